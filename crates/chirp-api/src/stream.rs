//! Server-sent events for live notifications, timeline items and comments.
//!
//! A list endpoint turns into a stream when the client asks for
//! `Accept: text/event-stream`. Each delivered item becomes one `data:` event
//! carrying the same JSON the list endpoint returns for it. Dropping the
//! response (client gone) drops the [`Subscription`] and unregisters it.

use std::time::Duration;

use axum::{
    http::{HeaderMap, HeaderValue, Version, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Serialize;
use tracing::debug;

use chirp_gateway::Subscription;

use crate::error::{ApiError, ApiResult};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Whether the client negotiated a live stream.
pub fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|media| media.split(';').next())
        .any(|media| media.trim().eq_ignore_ascii_case("text/event-stream"))
}

/// HTTP/1.0 has no chunked encoding, so events could not be flushed as they
/// happen. Refuse before anything is registered.
pub fn ensure_streamable(version: Version) -> ApiResult<()> {
    if version == Version::HTTP_09 || version == Version::HTTP_10 {
        return Err(ApiError::StreamingUnsupported);
    }
    Ok(())
}

pub fn event_stream<T>(kind: &'static str, mut subscription: Subscription<T>) -> Response
where
    T: Serialize + Send + 'static,
{
    debug!("{} stream {} opened for {}", kind, subscription.id(), subscription.key());

    let events = async_stream::stream! {
        while let Some(item) = subscription.recv().await {
            yield Event::default().json_data(&item);
        }
        debug!("{} stream {} closed for {}", kind, subscription.id(), subscription.key());
    };

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
