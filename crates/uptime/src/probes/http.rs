//! HTTP/HTTPS probe.

use super::{BodyCheck, ProbeError, ProbeSettings, tls};
use crate::types::{AlertType, HttpOptions, Monitor, Outcome, causes};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, Url};
use std::error::Error as StdError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 30;

pub(super) async fn probe(
    monitor: &Monitor,
    options: &HttpOptions,
    keyword: Option<&str>,
    settings: &ProbeSettings,
    timeout: Duration,
) -> Result<Outcome, ProbeError> {
    let url = Url::parse(&monitor.endpoint).map_err(|e| {
        ProbeError::invalid(monitor.id, format!("invalid endpoint '{}': {}", monitor.endpoint, e))
    })?;
    let method = Method::from_bytes(options.method.to_uppercase().as_bytes()).map_err(|_| {
        ProbeError::invalid(monitor.id, format!("invalid HTTP method '{}'", options.method))
    })?;
    let headers = header_map(monitor, options)?;

    let redirect = if options.follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let client = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(timeout)
        .redirect(redirect)
        .cookie_store(options.keep_cookies)
        .danger_accept_invalid_certs(!options.verify_tls)
        .build()
        .map_err(|e| ProbeError::Setup(format!("HTTP client: {}", e)))?;

    let mut request = client.request(method, url.clone()).headers(headers);
    if let Some(body) = &options.body {
        request = request.body(body.clone());
    }
    if let (Some(user), Some(pass)) = (&options.auth_user, &options.auth_pass) {
        request = request.basic_auth(user, Some(pass));
    }

    let start = Instant::now();
    let deadline = start + timeout;
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return Ok(classify_error(&e)),
    };
    let elapsed = start.elapsed();
    let status = response.status();
    let preview = describe_response(&response);

    let outcome = match monitor.alert_type {
        AlertType::Unavailable => {
            // "ok" means any status below 400
            if status.as_u16() < 400 {
                Outcome::up(elapsed, preview)
            } else {
                let reason = status.canonical_reason().unwrap_or("Unknown");
                Outcome::down(format!("HTTP {} - {}", status.as_u16(), reason), elapsed, preview)
            }
        }
        AlertType::ContainsKeyword | AlertType::DoesNotContainKeyword => {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => return Ok(classify_error(&e)),
            };
            match BodyCheck::for_http(monitor.alert_type, keyword).failure(&body) {
                Some(cause) => Outcome::down(cause, elapsed, preview),
                None => Outcome::up(elapsed, preview),
            }
        }
    };

    debug!(
        monitor_id = monitor.id,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        success = outcome.success,
        "HTTP probe finished"
    );

    if !outcome.success || options.tls_expiry_threshold_days == 0 || url.scheme() != "https" {
        return Ok(outcome);
    }

    let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
        return Ok(outcome);
    };

    match tls::days_until_expiry(host, port, options.verify_tls, deadline).await {
        Ok(days) if days <= i64::from(options.tls_expiry_threshold_days) => Ok(Outcome::down(
            format!("SSL certificate expires in {} days", days),
            outcome.response_time,
            outcome.response_preview,
        )),
        Ok(_) => Ok(outcome),
        Err(tls::TlsError::Timeout) => Ok(Outcome::timeout()),
        Err(e) => {
            warn!(monitor_id = monitor.id, host, error = %e, "TLS certificate check failed");
            Ok(Outcome::down(
                causes::TLS_HANDSHAKE_FAILURE,
                outcome.response_time,
                outcome.response_preview,
            ))
        }
    }
}

fn header_map(monitor: &Monitor, options: &HttpOptions) -> Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProbeError::invalid(monitor.id, format!("invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ProbeError::invalid(monitor.id, format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Status line followed by the response headers
fn describe_response(response: &Response) -> String {
    let status = response.status();
    let mut lines = vec![
        format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        ),
        String::new(),
    ];
    for (name, value) in response.headers() {
        lines.push(format!("{}: {}", name, value.to_str().unwrap_or("<binary>")));
    }
    lines.join("\n")
}

/// Fold a transport error into a failed outcome
fn classify_error(err: &reqwest::Error) -> Outcome {
    let cause = if err.is_timeout() {
        causes::TIMEOUT
    } else if err.is_redirect() {
        causes::TOO_MANY_REDIRECTS
    } else if is_dns_failure(err) {
        causes::DNS_FAILURE
    } else {
        causes::CONNECTION_ERROR
    };
    debug!(error = %err, cause, "HTTP probe transport failure");
    Outcome::unreachable(cause)
}

fn is_dns_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        let message = e.to_string();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return true;
        }
        source = e.source();
    }
    false
}
