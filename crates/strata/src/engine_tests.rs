//! Tests for the request engine

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::{
        config::StrataConfig,
        engine::Engine,
        error::{ErrorCategory, Result},
        events::LifecycleEvent,
        llm::ProviderError,
        modes::{self, CognitiveTier},
        request::{ModeSelection, Request, ResponseStatus},
        runtime::{HandlerOutput, TaskContext, TaskHandler},
        testing::{client, ScriptedProvider, ScriptedSearch},
    };

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        async fn handle(&self, _ctx: &mut TaskContext) -> Result<HandlerOutput> {
            panic!("handler bug");
        }
    }

    fn engine(provider: Arc<ScriptedProvider>) -> Engine {
        Engine::builder(StrataConfig::default())
            .with_llm(client(&[provider]))
            .with_search(Arc::new(ScriptedSearch::per_query(1)))
            .without_sandbox()
            .build()
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[tokio::test]
    async fn test_simple_question_is_cached_on_repeat() {
        let provider = Arc::new(ScriptedProvider::replying("primary", "4"));
        let engine = engine(provider.clone());

        let first = engine.process(Request::new("What is 2+2?")).await;
        assert!(first.is_success());
        assert_eq!(first.mode, modes::CHAT);
        assert_eq!(first.tier, CognitiveTier::Fast);
        assert!(!first.cached);

        let second = engine.process(Request::new("What is 2+2?")).await;
        assert!(second.cached);
        assert_eq!(second.result, "4");
        assert_eq!(second.input_tokens, 0);
        assert_eq!(provider.calls(), 1);
        assert_eq!(engine.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_agentic_outage_is_retried_then_reported_in_band() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = StrataConfig::default();
        config.retry.base_delay_ms = 1;
        config.research.output_dir = temp.path().to_path_buf();

        let primary = Arc::new(ScriptedProvider::failing(
            "primary",
            ProviderError::RequestFailed("connection refused".to_string()),
        ));
        let secondary = Arc::new(ScriptedProvider::failing(
            "secondary",
            ProviderError::NotAvailable("overloaded".to_string()),
        ));
        let engine = Engine::builder(config)
            .with_llm(client(&[primary.clone(), secondary.clone()]))
            .with_search(Arc::new(ScriptedSearch::per_query(1)))
            .without_sandbox()
            .build();

        let response = engine
            .process(
                Request::new("Write a comprehensive report on grid storage")
                    .with_mode(modes::DEEP_RESEARCH),
            )
            .await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.tier, CognitiveTier::Agentic);
        assert_eq!(response.errors.len(), 3);
        let attempts: Vec<_> = response.errors.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![0, 1, 2]);
        assert!(response.errors.iter().all(|r| r.step == "plan"));
        // Every attempt walks the whole provider chain once
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 3);

        let kinds = kinds(&response.events);
        assert_eq!(kinds.first(), Some(&"start"));
        assert_eq!(&kinds[kinds.len() - 2..], &["error", "end"]);
        assert!(!kinds.contains(&"result"));
    }

    #[tokio::test]
    async fn test_business_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::failing(
            "primary",
            ProviderError::ContentPolicy("refused".to_string()),
        ));
        let mut config = StrataConfig::default();
        config.retry.base_delay_ms = 1;
        let engine = Engine::builder(config)
            .with_llm(client(&[provider.clone()]))
            .with_search(Arc::new(ScriptedSearch::per_query(1)))
            .without_sandbox()
            .build();

        let response = engine
            .process(Request::new("anything").with_mode(modes::DEEP_RESEARCH))
            .await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].category, ErrorCategory::Business);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_routing_is_deterministic() {
        let engine = engine(Arc::new(ScriptedProvider::new("unused")));
        let queries = [
            "What is 2+2?",
            "Compare Python and Rust for data pipelines, then plot the results",
            "Write a comprehensive report on the state of solar energy",
            "",
        ];
        for query in queries {
            let first = engine.route(query, &ModeSelection::Auto);
            for _ in 0..5 {
                let again = engine.route(query, &ModeSelection::Auto);
                assert_eq!(again.mode(), first.mode());
                assert_eq!(again.confidence(), first.confidence());
            }
        }
        assert_eq!(
            engine.route("", &ModeSelection::Auto).mode().name(),
            modes::CHAT
        );
    }

    #[tokio::test]
    async fn test_conversation_history_reaches_the_prompt() {
        let provider = Arc::new(
            ScriptedProvider::new("primary")
                .then_reply("Nice to meet you, Sam.")
                .then_reply("Your name is Sam."),
        );
        let engine = engine(provider.clone());

        let first = engine
            .process(Request::new("Hello, I am Sam").with_conversation("c1"))
            .await;
        assert!(first.is_success());

        let second = engine
            .process(Request::new("hi, what is my name?").with_conversation("c1"))
            .await;
        assert!(second.is_success());
        assert!(!second.cached);

        let prompts = provider.prompts();
        assert!(prompts[1].contains("Hello, I am Sam"));
        assert!(prompts[1].contains("Nice to meet you, Sam."));
        assert_eq!(engine.conversations().turns("c1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_added_to_history() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        let engine = engine(provider);

        let response = engine
            .process(Request::new("hello").with_conversation("c2"))
            .await;
        assert_eq!(response.status, ResponseStatus::Failed);
        assert!(engine.conversations().turns("c2").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mode_falls_back_to_routing() {
        let engine = engine(Arc::new(ScriptedProvider::replying("primary", "hi")));
        let response = engine
            .process(Request::new("hello there").with_mode("telepathy"))
            .await;
        assert!(response.is_success());
        assert_eq!(response.mode, modes::CHAT);
    }

    #[tokio::test]
    async fn test_stream_and_response_carry_the_same_events() {
        let engine = engine(Arc::new(ScriptedProvider::replying("primary", "hi")));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let response = engine
            .process_streaming(Request::new("hello").with_mode(modes::CHAT), tx)
            .await;

        let mut streamed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            streamed.push(event);
        }
        assert_eq!(streamed, response.events);
        assert_eq!(kinds(&streamed), vec!["start", "token", "result", "end"]);
        assert!(streamed.iter().all(|e| e.trace_id() == response.trace_id));
    }

    #[tokio::test]
    async fn test_subscribers_see_every_request() {
        let engine = engine(Arc::new(ScriptedProvider::replying("primary", "hi")));
        let mut events = engine.subscribe();

        let response = engine.process(Request::new("hello")).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first().map(|e| e.kind()), Some("start"));
        assert_eq!(seen.last().map(|e| e.kind()), Some("end"));
        assert_eq!(seen.len(), response.events.len());
    }

    #[tokio::test]
    async fn test_panicking_handler_still_yields_a_response() {
        let engine = Engine::builder(StrataConfig::default())
            .with_llm(client(&[Arc::new(ScriptedProvider::replying("p", "x"))]))
            .with_search(Arc::new(ScriptedSearch::empty()))
            .without_sandbox()
            .with_handler(modes::CHAT, Arc::new(PanickingHandler))
            .build();

        let response = engine
            .process(Request::new("hello").with_mode(modes::CHAT))
            .await;

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.errors[0].category, ErrorCategory::Unknown);
        assert_eq!(kinds(&response.events), vec!["start", "error", "end"]);
    }

    #[tokio::test]
    async fn test_usage_is_reported_per_request() {
        let engine = engine(Arc::new(ScriptedProvider::replying("primary", "answer")));
        let response = engine
            .process(Request::new("refactor this function").with_mode(modes::CODE))
            .await;

        assert!(response.is_success());
        // Decompose and answer calls, 10 + 5 tokens each
        assert_eq!(response.input_tokens, 20);
        assert_eq!(response.output_tokens, 10);
    }
}
