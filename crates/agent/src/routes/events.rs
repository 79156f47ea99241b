//! Server-sent-event plumbing shared by the job listing/detail handlers
//! (section 4.6.2): `event: <name>` then `data: <json>` then a blank line,
//! fed from a fresh [`flynn_store::ListenerStream`] per connection.

use axum::response::sse::{Event, KeepAlive, Sse};
use flynn_store::{ListenerItem, ListenerStream};
use futures::stream::Stream;

/// Whether the client asked for a stream rather than a point-in-time list.
pub fn wants_stream(headers: &axum::http::HeaderMap) -> bool {
    headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/event-stream"))
}

/// Adapt a [`ListenerStream`] into the `axum` SSE response type. The
/// stream ends (and the client is disconnected) as soon as the listener
/// reports it lagged, per the "deliver a lagged sentinel, then close"
/// contract.
pub fn sse_response(listener: ListenerStream) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = futures::stream::unfold(listener, |mut listener| async move {
        match listener.next().await {
            Some(ListenerItem::Event(event)) => {
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());
                Some((Ok(Event::default().event("job").data(data)), listener))
            }
            Some(ListenerItem::Lagged { skipped }) => {
                let data = format!("{{\"skipped\":{skipped}}}");
                Some((Ok(Event::default().event("lagged").data(data)), listener))
            }
            None => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
