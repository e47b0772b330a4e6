use axum::{
    Extension, Json,
    extract::{Query, State},
    http::{HeaderMap, Version},
    response::{IntoResponse, Response},
};

use chirp_types::api::{Claims, PageQuery};

use crate::error::{ApiResult, blocking};
use crate::state::AppState;
use crate::stream;

/// The caller's home timeline, newest first, or a live stream of new items.
pub async fn timeline(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    version: Version,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Response> {
    if stream::wants_event_stream(&headers) {
        stream::ensure_streamable(version)?;
        let subscription = state.dispatcher.subscribe_timeline(claims.sub, &state.shutdown);
        return Ok(stream::event_stream("timeline", subscription));
    }

    let db = state.db.clone();
    let (last, before) = (page.page_size(), page.before());
    let items = blocking(move || db.list_timeline(claims.sub, last, before)).await?;

    Ok(Json(items).into_response())
}
