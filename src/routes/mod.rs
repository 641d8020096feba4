//! Greeting routes
//!
//! | Route | Operation | Response |
//! |-------|-----------|----------|
//! | `GET /` | `health_check` | `Hello, World!` |
//! | `GET /:user` | `get_user_greeting` | greeting text |
//! | `GET /simple-return/:user` | `text_return` | greeting text |
//! | `GET /simple-return/nested/:user` | `nested_text_return` | JSON record |

use crate::greeting::{self, GreetingError};
use crate::router::{HandlerError, Reply, Router};
use crate::telemetry::RequestContext;
use serde::Serialize;

/// JSON body of the nested greeting route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGreeting {
    pub id: u32,
    pub name: String,
    pub greeting_text: String,
}

impl Router {
    /// Routing table of the greeter service
    pub fn greeter() -> Self {
        Router::new()
            .get("/", "health_check", health_check)
            .get("/:user", "get_user_greeting", get_user_greeting)
            .get("/simple-return/:user", "text_return", text_return)
            .get(
                "/simple-return/nested/:user",
                "nested_text_return",
                nested_text_return,
            )
    }
}

impl From<GreetingError> for HandlerError {
    fn from(err: GreetingError) -> Self {
        HandlerError::BadRequest(err.to_string())
    }
}

pub async fn health_check(cx: RequestContext) -> Result<Reply, HandlerError> {
    cx.info("health check", &[]);
    Ok(Reply::text("Hello, World!"))
}

pub async fn get_user_greeting(cx: RequestContext) -> Result<Reply, HandlerError> {
    let text = lookup(&cx)?;
    Ok(Reply::text(text))
}

pub async fn text_return(cx: RequestContext) -> Result<Reply, HandlerError> {
    let text = lookup(&cx)?;
    Ok(Reply::text(text))
}

pub async fn nested_text_return(cx: RequestContext) -> Result<Reply, HandlerError> {
    let greeting_text = lookup(&cx)?;
    let body = UserGreeting {
        id: 1,
        name: user(&cx)?.trim().to_string(),
        greeting_text,
    };
    Reply::json(&body)
}

fn user(cx: &RequestContext) -> Result<&str, HandlerError> {
    cx.param("user")
        .ok_or_else(|| HandlerError::BadRequest("missing user parameter".to_string()))
}

fn lookup(cx: &RequestContext) -> Result<String, HandlerError> {
    let user = user(cx)?;
    let text = greeting::text_for(user)?;
    cx.info("greeting resolved", &[("user", user)]);
    Ok(text)
}
