//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use lmserve::{EffectiveParams, GenerationParams, ModelKind, ModelRecord, PipelineTask};
use proptest::prelude::*;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

/// Generate arbitrary (possibly invalid) parameter sets
fn arb_params() -> impl Strategy<Value = GenerationParams> {
    (
        prop::option::of(-10i64..10_000),       // max_new_tokens
        prop::option::of(-1.0f64..5.0),         // temperature
        prop::option::of(-0.5f64..1.5),         // top_p
        prop::option::of(-10i64..500),          // top_k
        prop::option::of(-1.0f64..3.0),         // repetition_penalty
        prop::option::of(prop::collection::vec("[a-z#\\n]{1,4}", 0..3)),
        prop::option::of(any::<u64>()),         // seed
    )
        .prop_map(
            |(max_new_tokens, temperature, top_p, top_k, repetition_penalty, stop, seed)| {
                GenerationParams {
                    max_new_tokens,
                    temperature,
                    top_p,
                    top_k,
                    repetition_penalty,
                    stop,
                    seed,
                }
            },
        )
}

/// Generate parameter sets that are valid by construction
fn arb_valid_params() -> impl Strategy<Value = GenerationParams> {
    (
        prop::option::of(1i64..10_000),
        prop::option::of(0.0f64..5.0),
        prop::option::of(0.01f64..=1.0),
        prop::option::of(0i64..500),
        prop::option::of(0.0f64..3.0),
        prop::option::of(any::<u64>()),
    )
        .prop_map(
            |(max_new_tokens, temperature, top_p, top_k, repetition_penalty, seed)| {
                GenerationParams {
                    max_new_tokens,
                    temperature,
                    top_p,
                    top_k,
                    repetition_penalty,
                    stop: None,
                    seed,
                }
            },
        )
}

fn arb_model_kind() -> impl Strategy<Value = ModelKind> {
    prop::sample::select(ModelKind::ALL.to_vec())
}

fn arb_record() -> impl Strategy<Value = ModelRecord> {
    (
        "[a-zA-Z0-9][a-zA-Z0-9/._-]{0,40}", // model_id like "org/name"
        "[a-zA-Z0-9 ._-]{0,30}",            // display_name
        arb_model_kind(),
        arb_valid_params(),
    )
        .prop_map(|(model_id, display_name, model_kind, parameters)| {
            ModelRecord::new(model_id, display_name, String::new(), model_kind, parameters)
        })
}

// =============================================================================
// Parameter Resolution Properties
// =============================================================================

proptest! {
    /// Resolution never panics, whatever the three layers contain
    #[test]
    fn resolve_never_panics(
        request in arb_params(),
        model in arb_params(),
        engine in arb_params(),
    ) {
        let _ = EffectiveParams::resolve(&request, &model, &engine);
    }

    /// Valid layers always resolve, and the result is within legal ranges
    #[test]
    fn valid_params_always_resolve(
        request in arb_valid_params(),
        model in arb_valid_params(),
        engine in arb_valid_params(),
    ) {
        let params = EffectiveParams::resolve(&request, &model, &engine).unwrap();
        prop_assert!(params.max_new_tokens >= 1);
        prop_assert!(params.temperature >= 0.0);
        prop_assert!(params.top_p > 0.0 && params.top_p <= 1.0);
        prop_assert!(params.repetition_penalty >= 0.0);
    }

    /// Request fields always win over the lower layers
    #[test]
    fn request_fields_take_precedence(
        request in arb_valid_params(),
        model in arb_valid_params(),
        engine in arb_valid_params(),
    ) {
        let params = EffectiveParams::resolve(&request, &model, &engine).unwrap();

        if let Some(n) = request.max_new_tokens {
            prop_assert_eq!(params.max_new_tokens, n as u32);
        }
        if let Some(t) = request.temperature {
            prop_assert_eq!(params.temperature, t);
        }
        if let Some(p) = request.top_p {
            prop_assert_eq!(params.top_p, p);
        }
        if let Some(seed) = request.seed {
            prop_assert_eq!(params.seed, Some(seed));
        }
    }

    /// Unset request fields fall through to the model layer
    #[test]
    fn model_defaults_fill_unset_request_fields(
        model in arb_valid_params(),
        engine in arb_valid_params(),
    ) {
        let params =
            EffectiveParams::resolve(&GenerationParams::default(), &model, &engine).unwrap();

        if let Some(t) = model.temperature {
            prop_assert_eq!(params.temperature, t);
        }
        if let Some(n) = model.max_new_tokens {
            prop_assert_eq!(params.max_new_tokens, n as u32);
        }
    }

    /// Merging is idempotent: layering a set over itself changes nothing
    #[test]
    fn merge_idempotent(params in arb_params()) {
        let merged = params.merge_over(&params);
        prop_assert_eq!(merged, params);
    }

    /// A non-positive token limit is always rejected before model access
    #[test]
    fn non_positive_token_limit_rejected(limit in -1000i64..=0) {
        let request = GenerationParams {
            max_new_tokens: Some(limit),
            ..Default::default()
        };
        let result = EffectiveParams::resolve(
            &request,
            &GenerationParams::default(),
            &GenerationParams::default(),
        );
        prop_assert!(result.is_err());
    }
}

// =============================================================================
// Serialization Properties
// =============================================================================

proptest! {
    /// Records survive a JSON round trip unchanged
    #[test]
    fn record_json_round_trip(record in arb_record()) {
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ModelRecord = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, record);
    }

    /// Parameter sets survive a JSON round trip unchanged
    #[test]
    fn params_json_round_trip(params in arb_params()) {
        let json = serde_json::to_string(&params).unwrap();
        let parsed: GenerationParams = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, params);
    }

    /// Kind names round-trip through their string form
    #[test]
    fn model_kind_string_round_trip(kind in arb_model_kind()) {
        let parsed: ModelKind = kind.as_str().parse().unwrap();
        prop_assert_eq!(parsed, kind);
    }
}

// =============================================================================
// Dispatch Properties
// =============================================================================

proptest! {
    /// Every task/kind combination has a stable verdict, and mask-filling
    /// models never serve any task
    #[test]
    fn task_compatibility_is_total(
        task in prop::sample::select(PipelineTask::ALL.to_vec()),
        kind in arb_model_kind(),
    ) {
        let verdict = task.compatible_with(kind);
        prop_assert_eq!(verdict, task.compatible_with(kind));
        if kind == ModelKind::FillMask {
            prop_assert!(!verdict);
        }
    }
}
