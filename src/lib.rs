//! ESI Wasm Filter for Envoy Proxy
//!
//! This filter rewrites `text/*` response bodies as they stream from the
//! origin, handling two Edge Side Includes directives:
//! - `<esi:assign name=".." value=".."/>` stores a variable
//! - `<esi:include src=".."/>` is replaced by the body of a sub-request
//!
//! Bytes outside directives are forwarded as soon as they arrive. While an
//! include is being fetched the response is paused, so output order always
//! matches input order. If a fetch fails, the rest of the body passes
//! through exactly as the origin sent it.
//!
//! `accept-encoding` is removed from every request by default so that
//! bodies arrive unencoded; whether a response is translatable is only
//! known later. Set `strip_accept_encoding: false` to keep it.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod config;
pub mod esi;
pub mod pipeline;
pub mod streaming;
pub mod subrequest;
pub mod telemetry;

use log::{debug, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};
use std::rc::Rc;
use std::time::Duration;

use config::FilterConfig;
use esi::{
    BodyRewriter, EsiTranslator, SharedVariables, TranslatorOptions, VariableScope, VariableStore,
};
use subrequest::{FetchError, FetchOutcome, SubrequestTarget};

/// Read length meaning "everything buffered"
const WHOLE_BUFFER: usize = u32::MAX as usize;

/// Root context for filter lifecycle management
struct EsiRootContext {
    config: FilterConfig,
    /// Store shared by every request on this worker when
    /// `variable_scope` is `worker`
    worker_variables: SharedVariables,
}

impl EsiRootContext {
    fn new() -> Self {
        Self {
            config: FilterConfig::default(),
            worker_variables: VariableStore::shared(),
        }
    }
}

impl Context for EsiRootContext {}

impl RootContext for EsiRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        if let Some(config_bytes) = self.get_plugin_configuration() {
            match FilterConfig::from_bytes(&config_bytes) {
                Ok(config) => self.config = config,
                Err(e) => warn!("Invalid filter configuration, keeping defaults: {}", e),
            }
        }

        proxy_wasm::set_log_level(if self.config.debug {
            LogLevel::Debug
        } else {
            LogLevel::Info
        });

        info!(
            "ESI Filter initialized: assign={}, fixedURL={:?}, localtest={}, variable_scope={:?}",
            self.config.assign,
            self.config.fixed_url,
            self.config.localtest,
            self.config.variable_scope
        );

        true
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        let variables = match self.config.variable_scope {
            VariableScope::Worker => Rc::clone(&self.worker_variables),
            VariableScope::Request => VariableStore::shared(),
        };
        Some(Box::new(EsiHttpContext::new(
            context_id,
            self.config.clone(),
            variables,
        )))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// Sub-request currently awaited
struct InFlight {
    token: u32,
    target: SubrequestTarget,
    redirects: u32,
}

/// HTTP context for per-request processing
struct EsiHttpContext {
    context_id: u32,
    /// Configuration snapshot for this request
    config: FilterConfig,
    variables: SharedVariables,
    /// Base for relative include URLs
    request_target: Option<SubrequestTarget>,
    /// Set once the response headers allow translation
    rewriter: Option<BodyRewriter>,
    in_flight: Option<InFlight>,
    /// Translated bytes at the head of the paused body buffer
    held: usize,
}

impl EsiHttpContext {
    fn new(context_id: u32, config: FilterConfig, variables: SharedVariables) -> Self {
        Self {
            context_id,
            config,
            variables,
            request_target: None,
            rewriter: None,
            in_flight: None,
            held: 0,
        }
    }

    /// Hand new body input to the rewriter, write what is ready back into
    /// the body and decide whether Envoy may forward it.
    ///
    /// While paused the buffer holds our earlier output followed by input
    /// Envoy kept for us; only the part after `held` is new.
    fn pump(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        let body = self
            .get_http_response_body(0, body_size)
            .unwrap_or_default();
        let held = self.held.min(body.len());

        let mut output = body[..held].to_vec();
        if let Some(rewriter) = self.rewriter.as_mut() {
            rewriter.push(&body[held..], end_of_stream);
        }
        self.drain(&mut output);

        self.set_http_response_body(0, body.len(), &output);

        if self.in_flight.is_some() {
            self.held = output.len();
            Action::Pause
        } else {
            self.held = 0;
            Action::Continue
        }
    }

    /// Move ready output into `output` and dispatch the next include, if
    /// the rewriter reached one.
    fn drain(&mut self, output: &mut Vec<u8>) {
        loop {
            let next = match self.rewriter.as_mut() {
                Some(rewriter) => rewriter.drain(output),
                None => None,
            };
            let Some(target) = next else {
                return;
            };

            let dispatched = SubrequestTarget::resolve(self.request_target.as_ref(), &target)
                .and_then(|resolved| self.dispatch(&resolved).map(|token| (token, resolved)));

            match dispatched {
                Ok((token, resolved)) => {
                    debug!(
                        "[context_id={}] esi:include dispatched to {}",
                        self.context_id,
                        resolved.url()
                    );
                    self.in_flight = Some(InFlight {
                        token,
                        target: resolved,
                        redirects: 0,
                    });
                    return;
                }
                Err(e) => self.fail_include(&e),
            }
        }
    }

    fn dispatch(&self, target: &SubrequestTarget) -> Result<u32, FetchError> {
        self.dispatch_http_call(
            &self.config.upstream_cluster,
            target.headers(&self.config.user_agent),
            None,
            vec![],
            Duration::from_millis(self.config.subrequest_timeout_ms),
        )
        .map_err(|status| FetchError::Dispatch(format!("{:?}", status)))
    }

    /// Re-dispatch a redirected include. Returns `true` if a call is in
    /// flight again.
    fn follow_redirect(&mut self, flight: InFlight, location: &str) -> bool {
        if flight.redirects >= self.config.max_redirects {
            self.fail_include(&FetchError::TooManyRedirects(flight.redirects));
            return false;
        }

        let dispatched = SubrequestTarget::resolve(Some(&flight.target), location)
            .and_then(|target| self.dispatch(&target).map(|token| (token, target)));

        match dispatched {
            Ok((token, target)) => {
                debug!(
                    "[context_id={}] esi:include redirected to {}",
                    self.context_id,
                    target.url()
                );
                self.in_flight = Some(InFlight {
                    token,
                    target,
                    redirects: flight.redirects + 1,
                });
                true
            }
            Err(e) => {
                self.fail_include(&e);
                false
            }
        }
    }

    /// Give up on translation: the failing directive and everything after
    /// it pass through untouched. Bytes already sent cannot be recalled.
    fn fail_include(&mut self, error: &FetchError) {
        let Some(include) = self.rewriter.as_mut().and_then(|r| r.fail()) else {
            return;
        };
        telemetry::audit_include_failed(&include.target, &error.to_string())
            .with_context_id(self.context_id)
            .emit();
    }
}

impl Context for EsiHttpContext {
    fn on_http_call_response(
        &mut self,
        token_id: u32,
        _num_headers: usize,
        body_size: usize,
        _num_trailers: usize,
    ) {
        let Some(flight) = self.in_flight.take() else {
            warn!(
                "[context_id={}] Unexpected sub-request response (token {})",
                self.context_id, token_id
            );
            return;
        };
        if flight.token != token_id {
            warn!(
                "[context_id={}] Sub-request token mismatch: expected {}, got {}",
                self.context_id, flight.token, token_id
            );
            self.in_flight = Some(flight);
            return;
        }

        let status = self
            .get_http_call_response_header(":status")
            .and_then(|s| s.parse::<u16>().ok());
        let location = self.get_http_call_response_header("location");
        let body = self.get_http_call_response_body(0, body_size);

        match FetchOutcome::from_response(status, location, body) {
            Ok(FetchOutcome::Body(text)) => {
                telemetry::audit_fetched(flight.target.url(), status.unwrap_or_default(), text.len())
                    .with_context_id(self.context_id)
                    .emit();
                if let Some(rewriter) = self.rewriter.as_mut() {
                    rewriter.complete(text.into_bytes());
                }
            }
            Ok(FetchOutcome::Redirect(location)) => {
                if self.follow_redirect(flight, &location) {
                    return;
                }
            }
            Err(e) => self.fail_include(&e),
        }

        if matches!(self.pump(WHOLE_BUFFER, false), Action::Continue) {
            self.resume_http_response();
        }
    }
}

impl HttpContext for EsiHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let path = self
            .get_http_request_header(":path")
            .unwrap_or_else(|| "/".to_string());
        let scheme = self
            .get_http_request_header(":scheme")
            .unwrap_or_else(|| "http".to_string());
        let mut authority = self.get_http_request_header(":authority");

        debug!("[context_id={}] Request path: {}", self.context_id, path);

        if self.config.localtest {
            debug!(
                "[context_id={}] localtest: routing to {}",
                self.context_id, self.config.localtest_authority
            );
            self.set_http_request_header(":authority", Some(self.config.localtest_authority.as_str()));
            authority = Some(self.config.localtest_authority.clone());
        }

        // Bodies must arrive unencoded to be scanned
        if self.config.strip_accept_encoding {
            self.set_http_request_header("accept-encoding", None);
        }

        self.request_target = authority.and_then(|a| SubrequestTarget::new(&scheme, &a, &path).ok());

        if self.config.assign {
            pipeline::seed_request_variables(&mut self.variables.borrow_mut(), &path);
        }

        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let content_type = self.get_http_response_header("content-type");
        let content_encoding = self.get_http_response_header("content-encoding");

        if !pipeline::should_translate(content_type.as_deref(), content_encoding.as_deref()) {
            telemetry::audit_skipped(content_type.as_deref().unwrap_or("no content-type"))
                .with_context_id(self.context_id)
                .emit();
            return Action::Continue;
        }

        self.set_http_response_header("cache-control", Some(pipeline::NO_SHARED_CACHE));
        self.set_http_response_header("content-length", None);
        self.set_http_response_header("x-esi-processed", Some("true"));

        telemetry::audit_started(content_type.as_deref().unwrap_or_default())
            .with_context_id(self.context_id)
            .emit();

        self.rewriter = Some(BodyRewriter::new(EsiTranslator::new(
            TranslatorOptions::from(&self.config),
            Rc::clone(&self.variables),
        )));

        Action::Continue
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.rewriter.is_none() {
            return Action::Continue;
        }

        debug!(
            "[context_id={}] Received body chunk: {} bytes, end_of_stream: {}",
            self.context_id, body_size, end_of_stream
        );

        self.pump(body_size, end_of_stream)
    }

    fn on_log(&mut self) {
        match &self.rewriter {
            Some(rewriter) => {
                let stats = rewriter.stats();
                info!(
                    "[context_id={}] ESI complete: {} bytes scanned, {} tags, {} assigns, {} includes, {} variables, failed={}",
                    self.context_id,
                    rewriter.bytes_scanned(),
                    stats.tags,
                    stats.assigns,
                    stats.includes,
                    self.variables.borrow().len(),
                    rewriter.is_failed()
                );
            }
            None => {
                debug!(
                    "[context_id={}] Request processing complete (not translated)",
                    self.context_id
                );
            }
        }
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(EsiRootContext::new())
    });
}}
