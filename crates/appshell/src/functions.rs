//! Typed wire contract for the serverless chat function.
//!
//! Every function accepts `POST` with a JSON body and answers with a JSON
//! body. The chat function takes the conversation so far and returns either
//! `{"reply": ...}` or `{"error": ...}`; [`send_chat`] drives it through an
//! [`EndpointResolver`] and lifts both failure shapes into [`ChatError`].

use serde::{Deserialize, Serialize};

use crate::resolver::{EndpointResolver, ResolveError};

/// Function name of the chat assistant proxy.
pub const CHAT_FUNCTION: &str = "chat";

/// Error type for chat calls
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),
	/// The function answered with an `{"error": ...}` body or a non-success
	/// status. The message is already user-presentable; upstream provider
	/// detail never reaches this side.
	#[error("chat backend error: {0}")]
	Backend(String),
	#[error("chat backend returned success without a reply")]
	MissingReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
	User,
	Assistant,
}

/// One turn of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: ChatRole,
	pub content: String,
}

impl ChatMessage {
	pub fn user(content: impl Into<String>) -> Self {
		Self {
			role: ChatRole::User,
			content: content.into(),
		}
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self {
			role: ChatRole::Assistant,
			content: content.into(),
		}
	}
}

/// Request body: the full history, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
	pub messages: Vec<ChatMessage>,
}

/// Response body. Exactly one of the fields is populated by a well-behaved
/// function; both absent means the contract was violated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatReply {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Send the conversation to the chat function and return the assistant's
/// reply text.
///
/// An `{"error": ...}` body wins over the status code, so the 4xx/502/500
/// bodies the function emits surface with their user-facing message intact.
pub async fn send_chat(
	resolver: &EndpointResolver,
	messages: &[ChatMessage],
) -> Result<String, ChatError> {
	let request = ChatRequest {
		messages: messages.to_vec(),
	};
	let call = resolver.call_json(CHAT_FUNCTION, &request).await?;

	let parsed: ChatReply = serde_json::from_value(call.data).unwrap_or_default();
	if let Some(error) = parsed.error {
		return Err(ChatError::Backend(error));
	}
	if !call.response.status.is_success() {
		return Err(ChatError::Backend(format!(
			"chat function returned status {}",
			call.response.status
		)));
	}
	parsed.reply.ok_or(ChatError::MissingReply)
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use assert_matches::assert_matches;
	use http::StatusCode;
	use serde_json::json;

	use super::*;
	use crate::fetch::{Fetch, FetchError, FetchRequest, FetchResponse};
	use crate::resolver::ResolverConfig;

	/// Mock function backend that answers every request with one canned
	/// response and keeps the requests it saw.
	struct CannedFetch {
		status: StatusCode,
		body: &'static str,
		seen: Mutex<Vec<FetchRequest>>,
	}

	impl CannedFetch {
		fn new(status: u16, body: &'static str) -> Arc<Self> {
			Arc::new(Self {
				status: StatusCode::from_u16(status).unwrap(),
				body,
				seen: Mutex::new(Vec::new()),
			})
		}
	}

	#[async_trait::async_trait]
	impl Fetch for CannedFetch {
		async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
			self.seen.lock().unwrap().push(request);
			Ok(FetchResponse::new(self.status).with_body(self.body))
		}
	}

	fn resolver(fetch: Arc<CannedFetch>) -> EndpointResolver {
		EndpointResolver::new(fetch, ResolverConfig::new())
	}

	#[test]
	fn test_roles_serialize_lowercase() {
		assert_eq!(
			serde_json::to_value(ChatMessage::user("hi")).unwrap(),
			json!({"role": "user", "content": "hi"})
		);
		assert_eq!(
			serde_json::to_value(ChatMessage::assistant("hello")).unwrap(),
			json!({"role": "assistant", "content": "hello"})
		);
	}

	#[tokio::test]
	async fn test_send_chat_returns_reply() {
		let fetch = CannedFetch::new(200, r#"{"reply":"We can help with that."}"#);
		let resolver = resolver(fetch.clone());

		let history = [
			ChatMessage::user("Do you do data platform audits?"),
			ChatMessage::assistant("Yes."),
			ChatMessage::user("Great, tell me more."),
		];
		let reply = send_chat(&resolver, &history).await.unwrap();
		assert_eq!(reply, "We can help with that.");

		let seen = fetch.seen.lock().unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].uri.to_string(), "/api/chat");
		let body: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
		assert_eq!(body["messages"][0]["role"], "user");
		assert_eq!(body["messages"][1]["role"], "assistant");
		assert_eq!(body["messages"][2]["content"], "Great, tell me more.");
	}

	#[tokio::test]
	async fn test_error_body_surfaces_as_backend_error() {
		let fetch = CannedFetch::new(502, r#"{"error":"The assistant is unavailable right now."}"#);
		let resolver = resolver(fetch);

		let err = send_chat(&resolver, &[ChatMessage::user("hi")])
			.await
			.unwrap_err();
		assert_matches!(err, ChatError::Backend(message) => {
			assert_eq!(message, "The assistant is unavailable right now.");
		});
	}

	#[tokio::test]
	async fn test_non_success_without_error_body_is_generic() {
		let fetch = CannedFetch::new(500, "");
		let resolver = resolver(fetch);

		let err = send_chat(&resolver, &[ChatMessage::user("hi")])
			.await
			.unwrap_err();
		assert_matches!(err, ChatError::Backend(message) => {
			assert!(message.contains("500"));
		});
	}

	#[tokio::test]
	async fn test_success_without_reply_is_missing_reply() {
		let fetch = CannedFetch::new(200, "{}");
		let resolver = resolver(fetch);

		let err = send_chat(&resolver, &[ChatMessage::user("hi")])
			.await
			.unwrap_err();
		assert_matches!(err, ChatError::MissingReply);
	}
}
