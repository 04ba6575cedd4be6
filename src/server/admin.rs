use crate::pipeline::context::{empty_body, full_body, BoxBody};
use crate::server::GatewayState;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

/// Minimal admin surface: `/health`, `/ready`, `/metrics`. No domain/route
/// CRUD, no CORS, no JWT login — those stay external to this gateway.
pub fn handle_admin(req: Request<Incoming>, state: GatewayState) -> Response<BoxBody> {
    match req.uri().path() {
        "/health" => Response::builder()
            .status(StatusCode::OK)
            .body(full_body("ok"))
            .expect("static response parts are always valid"),
        "/ready" => Response::builder()
            .status(StatusCode::OK)
            .body(full_body("ready"))
            .expect("static response parts are always valid"),
        "/metrics" => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(full_body(state.metrics.render()))
            .expect("static response parts are always valid"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(empty_body())
            .expect("static response parts are always valid"),
    }
}
