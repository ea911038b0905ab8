//! Integration tests for the `/v1/generate` request contract: field
//! validation and mode dispatch should be decidable without ever reaching a
//! network call.

use ragbridge::error::ServiceError;
use ragbridge::types::{BaseUrl, ModelName, Temperature};

#[test]
fn empty_current_message_is_rejected_conceptually() {
    // current_message validation happens inline in the generate handler;
    // this exercises the same rule the handler applies.
    let current_message = "   ";
    let is_valid = !current_message.trim().is_empty();
    assert!(!is_valid);
    assert_eq!(ServiceError::MissingCurrentMessage.code(), "missing_current_message");
}

#[test]
fn base_url_rejects_missing_scheme() {
    assert!(BaseUrl::new("localhost:1234/v1").is_err());
    assert!(BaseUrl::new("http://localhost:1234/v1").is_ok());
}

#[test]
fn model_name_rejects_blank() {
    assert!(ModelName::new("   ").is_err());
    assert!(ModelName::new("qwen2.5-32b").is_ok());
}

#[test]
fn temperature_clamps_out_of_range_values() {
    let high = Temperature::new(5.0).unwrap();
    assert_eq!(high.value(), 2.0);
    let low = Temperature::new(-1.0).unwrap();
    assert_eq!(low.value(), 0.0);
}

#[test]
fn missing_vdb_url_for_knowledge_base_mode_has_stable_code() {
    assert_eq!(ServiceError::MissingVdbUrl.code(), "missing_vdb_url");
    assert_eq!(ServiceError::EmptyEmbedApiKey.code(), "empty_embed_api_key");
    assert_eq!(ServiceError::MissingEmbedApiKey.code(), "missing_embed_api_key");
}
