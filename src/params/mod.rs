//! Capability-gated option translation.
//!
//! [`translate`] validates canonical [`GenerationOptions`] against the
//! resolved model's capability flags before any adapter or network work
//! happens. It is a pure function: same model, options, and streaming flag
//! always produce byte-identical output, in any call order. Unsupported
//! combinations are rejected with `EncodingError`; soft incompatibilities
//! drop the offending parameter and report a [`Warning`].
//!
//! Backend-specific parameter names are not this module's concern — each
//! adapter renames during `encode` (`max_tokens` becomes OpenAI's
//! `max_completion_tokens`, Anthropic's `max_tokens`, Bedrock's
//! `inferenceConfig.maxTokens`).

use crate::error::{LlmError, Warning};
use crate::types::options::ResponseFormat;
use crate::types::{ChatContext, GenerationOptions, ModelInfo};

/// Validates and normalizes options for one call.
///
/// Returns the options an adapter may encode verbatim, plus warnings for
/// every parameter that was dropped or adjusted.
pub fn translate(
    model: &ModelInfo,
    context: &ChatContext,
    options: &GenerationOptions,
    streaming: bool,
) -> Result<(GenerationOptions, Vec<Warning>), LlmError> {
    let caps = &model.capabilities;
    let mut translated = options.clone();
    let mut warnings = Vec::new();

    if context.has_tools() && !caps.tool_calling {
        return Err(LlmError::EncodingError(format!(
            "model {} does not support tool calling",
            model.id
        )));
    }

    if streaming {
        if !caps.streaming_text {
            return Err(LlmError::EncodingError(format!(
                "model {} does not support streaming",
                model.id
            )));
        }
        if context.has_tools() && !caps.tool_call_streaming {
            return Err(LlmError::EncodingError(format!(
                "model {} does not support tool calls on a stream",
                model.id
            )));
        }
    }

    if matches!(translated.response_format, ResponseFormat::JsonSchema { .. })
        && !caps.native_json_schema
    {
        return Err(LlmError::EncodingError(format!(
            "model {} does not support a JSON schema response format",
            model.id
        )));
    }

    if translated.reasoning_effort.is_some() && !caps.reasoning {
        translated.reasoning_effort = None;
        warnings.push(Warning::unsupported(
            "reasoning_effort",
            Some("model has no reasoning capability; parameter dropped"),
        ));
    }

    // Reasoning effort and sampling temperature are documented as mutually
    // exclusive; effort wins when both are set.
    if translated.reasoning_effort.is_some() && translated.temperature.is_some() {
        translated.temperature = None;
        warnings.push(Warning::unsupported(
            "temperature",
            Some("incompatible with reasoning_effort; parameter dropped"),
        ));
    }

    if let Some(max_tokens) = translated.max_tokens {
        if max_tokens > model.limits.max_output {
            translated.max_tokens = Some(model.limits.max_output);
            warnings.push(Warning::other(format!(
                "max_tokens {} exceeds the model limit {}; clamped",
                max_tokens, model.limits.max_output
            )));
        }
    }

    Ok((translated, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::options::ReasoningEffort;
    use crate::types::{Message, ModelCapabilities, ModelLimits, ProviderId, Tool};
    use serde_json::json;

    fn model(capabilities: ModelCapabilities) -> ModelInfo {
        ModelInfo::new(ProviderId::OpenAi, "test-model").with_capabilities(capabilities)
    }

    fn context_with_tools() -> ChatContext {
        ChatContext::from_messages(vec![Message::user("hi")])
            .unwrap()
            .with_tools(vec![Tool::function("search", "Search.", json!({}))])
    }

    #[test]
    fn identical_inputs_translate_identically() {
        let model = model(ModelCapabilities {
            reasoning: true,
            ..Default::default()
        });
        let ctx = context_with_tools();
        let options = GenerationOptions::new()
            .with_temperature(0.7)
            .with_reasoning_effort(ReasoningEffort::High)
            .with_max_tokens(100_000);

        let a = translate(&model, &ctx, &options, false).unwrap();
        let b = translate(&model, &ctx, &options, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a.0).unwrap(),
            serde_json::to_vec(&b.0).unwrap()
        );
    }

    #[test]
    fn streamed_tool_calls_are_rejected_without_the_capability() {
        let model = model(ModelCapabilities {
            tool_calling: true,
            tool_call_streaming: false,
            ..Default::default()
        });
        let err = translate(
            &model,
            &context_with_tools(),
            &GenerationOptions::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::EncodingError(_)));

        // The same request buffered is fine.
        assert!(
            translate(
                &model,
                &context_with_tools(),
                &GenerationOptions::default(),
                false,
            )
            .is_ok()
        );
    }

    #[test]
    fn tools_are_rejected_when_the_model_cannot_call_them() {
        let model = model(ModelCapabilities {
            tool_calling: false,
            ..Default::default()
        });
        let err = translate(
            &model,
            &context_with_tools(),
            &GenerationOptions::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::EncodingError(_)));
    }

    #[test]
    fn temperature_is_dropped_when_reasoning_effort_is_set() {
        let model = model(ModelCapabilities {
            reasoning: true,
            ..Default::default()
        });
        let ctx = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
        let options = GenerationOptions::new()
            .with_temperature(0.9)
            .with_reasoning_effort(ReasoningEffort::Low);

        let (translated, warnings) = translate(&model, &ctx, &options, false).unwrap();
        assert!(translated.temperature.is_none());
        assert!(translated.reasoning_effort.is_some());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn reasoning_effort_is_dropped_without_the_capability() {
        let model = model(ModelCapabilities::default());
        let ctx = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
        let options = GenerationOptions::new()
            .with_temperature(0.9)
            .with_reasoning_effort(ReasoningEffort::Low);

        let (translated, warnings) = translate(&model, &ctx, &options, false).unwrap();
        // Effort goes first, so temperature survives.
        assert!(translated.reasoning_effort.is_none());
        assert_eq!(translated.temperature, Some(0.9));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn max_tokens_is_clamped_to_the_model_limit() {
        let model = ModelInfo::new(ProviderId::OpenAi, "m").with_limits(ModelLimits {
            context_window: 8_192,
            max_output: 1_024,
        });
        let ctx = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
        let options = GenerationOptions::new().with_max_tokens(9_999);

        let (translated, warnings) = translate(&model, &ctx, &options, false).unwrap();
        assert_eq!(translated.max_tokens, Some(1_024));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn json_schema_requires_the_native_capability() {
        let model = model(ModelCapabilities {
            native_json_schema: false,
            ..Default::default()
        });
        let ctx = ChatContext::from_messages(vec![Message::user("hi")]).unwrap();
        let options = GenerationOptions::new().with_json_schema(json!({"type": "object"}));
        assert!(translate(&model, &ctx, &options, false).is_err());
    }
}
