use crate::error::ApiError;

pub const REQUESTS_TOTAL: &str = "engage_api_requests_total";
pub const FAILURES_TOTAL: &str = "engage_api_failures_total";

pub(crate) fn request(method: &reqwest::Method) {
    metrics::counter!(REQUESTS_TOTAL, "method" => method.as_str().to_owned()).increment(1);
}

pub(crate) fn failure(err: &ApiError) {
    let kind = match err.status_code {
        0 => "unreachable",
        401 => "unauthorized",
        400..=499 => "client",
        _ => "server",
    };
    metrics::counter!(FAILURES_TOTAL, "kind" => kind).increment(1);
}
