//! `/write` endpoint

use super::error_response;
use crate::cluster::Proxy;
use crate::model::{line_protocol, ConsistencyLevel, Precision};
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct WriteParams {
    pub db: Option<String>,
    pub consistency: Option<String>,
    pub precision: Option<String>,
}

pub async fn write(
    State(proxy): State<Proxy>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(database) = params.db.filter(|db| !db.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "database is required");
    };
    let precision = match Precision::parse(params.precision.as_deref().unwrap_or("")) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let consistency = match ConsistencyLevel::parse(params.consistency.as_deref().unwrap_or("")) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let text = match decode_body(&headers, &body) {
        Ok(text) => text,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    if text.trim().is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let (samples, parse_error) = line_protocol::parse(&text, precision, now);
    if samples.is_empty() {
        let message = parse_error.map(|e| e.to_string()).unwrap_or_default();
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    debug!(db = %database, points = samples.len(), "Writing points");
    if let Err(e) = proxy
        .writer
        .write(&database, consistency, precision, &samples)
        .await
    {
        warn!(db = %database, error = %e, "Write failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
    }

    match parse_error {
        Some(e) => error_response(StatusCode::BAD_REQUEST, format!("partial write: {}", e)),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Body as UTF-8, gunzipped when `Content-Encoding: gzip`
fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<String> {
    let gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    if gzip {
        let mut text = String::new();
        GzDecoder::new(body)
            .read_to_string(&mut text)
            .map_err(|e| Error::InvalidRequest(format!("invalid gzip body: {}", e)))?;
        Ok(text)
    } else {
        String::from_utf8(body.to_vec()).map_err(|e| Error::InvalidRequest(format!("body is not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn decodes_plain_and_gzip_bodies() {
        let line = "cpu,host=a value=1 1";
        assert_eq!(decode_body(&HeaderMap::new(), line.as_bytes()).unwrap(), line);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(line.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
        assert_eq!(decode_body(&headers, &compressed).unwrap(), line);
        assert!(decode_body(&headers, line.as_bytes()).is_err());
    }
}
