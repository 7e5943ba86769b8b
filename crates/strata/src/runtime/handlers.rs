//! Built-in task handlers, one per mode family

use std::sync::Arc;

use async_trait::async_trait;

use super::{HandlerOutput, HandlerRegistry, TaskContext, TaskHandler};
use crate::{
    error::Result,
    knowledge::{render_passages, KnowledgeBase},
    llm::{GenerationOptions, LlmClient},
    modes,
    research::DeepResearchWorkflow,
};

const CHAT_SYSTEM: &str = "You are a helpful assistant. Answer directly and concisely.";

const KNOWLEDGE_SYSTEM: &str = "You answer questions using the reference passages provided. \
Cite passages as [n]. If the passages do not contain the answer, say so and answer from general knowledge.";

const PASSAGE_LIMIT: usize = 4;

/// Single model call for conversational queries
pub struct ChatHandler {
    llm: LlmClient,
    options: GenerationOptions,
}

impl ChatHandler {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            options: GenerationOptions::default()
                .with_system(CHAT_SYSTEM)
                .with_temperature(0.3),
        }
    }
}

#[async_trait]
impl TaskHandler for ChatHandler {
    async fn handle(&self, ctx: &mut TaskContext) -> Result<HandlerOutput> {
        let prompt = ctx.prompt_with_history();
        let generation = self
            .llm
            .generate_metered(&prompt, &self.options, &ctx.usage)
            .await?;
        ctx.events.token(generation.text.clone());
        Ok(HandlerOutput::text(generation.text))
    }
}

/// Answers grounded in retrieved passages
pub struct KnowledgeHandler {
    llm: LlmClient,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
}

impl KnowledgeHandler {
    pub fn new(llm: LlmClient, knowledge: Option<Arc<dyn KnowledgeBase>>) -> Self {
        Self { llm, knowledge }
    }
}

#[async_trait]
impl TaskHandler for KnowledgeHandler {
    async fn handle(&self, ctx: &mut TaskContext) -> Result<HandlerOutput> {
        let passages = match &self.knowledge {
            Some(knowledge) => match knowledge.retrieve(ctx.query(), PASSAGE_LIMIT).await {
                Ok(passages) => passages,
                Err(err) => {
                    tracing::warn!("[KNOWLEDGE] Retrieval failed, answering without passages: {}", err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        ctx.events.progress(
            "retrieval",
            format!("Retrieved {} passages", passages.len()),
        );

        let question = ctx.prompt_with_history();
        let prompt = if passages.is_empty() {
            question
        } else {
            format!(
                "Reference passages:\n{}\n\nQuestion:\n{}",
                render_passages(&passages),
                question
            )
        };

        let options = GenerationOptions::default()
            .with_system(KNOWLEDGE_SYSTEM)
            .with_temperature(0.2);
        let generation = self
            .llm
            .generate_metered(&prompt, &options, &ctx.usage)
            .await?;
        ctx.events.token(generation.text.clone());
        Ok(HandlerOutput::text(generation.text))
    }
}

/// Two-step pipeline: break the task down, then answer following that plan.
/// Holds no state between requests.
pub struct AnalyticalHandler {
    llm: LlmClient,
    instructions: String,
}

impl AnalyticalHandler {
    pub fn new(llm: LlmClient, instructions: impl Into<String>) -> Self {
        Self {
            llm,
            instructions: instructions.into(),
        }
    }

    /// Handler with the built-in instructions for `mode`
    pub fn for_mode(llm: LlmClient, mode: &str) -> Self {
        let instructions = match mode {
            modes::DATA_ANALYSIS => {
                "You are a data analyst. Be quantitative, state assumptions and show how each figure is derived."
            }
            modes::CODE => {
                "You are a senior software engineer. Give working code, explain non-obvious parts and point out edge cases."
            }
            modes::WRITING => {
                "You are a skilled editor and writer. Match the requested tone and keep the structure clear."
            }
            _ => "You are a careful analyst. Reason step by step and answer precisely.",
        };
        Self::new(llm, instructions)
    }
}

#[async_trait]
impl TaskHandler for AnalyticalHandler {
    async fn handle(&self, ctx: &mut TaskContext) -> Result<HandlerOutput> {
        let task = ctx.prompt_with_history();

        ctx.events.progress("decompose", "Breaking the task into steps");
        let plan_prompt = format!(
            "Break this task into a short numbered list of steps needed to answer it well. \
             Do not answer it yet.\n\nTask:\n{}",
            task
        );
        let plan_options = GenerationOptions::default()
            .with_system(self.instructions.clone())
            .with_temperature(0.2)
            .with_max_tokens(600);
        let plan = self
            .llm
            .generate_metered(&plan_prompt, &plan_options, &ctx.usage)
            .await?;

        ctx.events.progress("answer", "Working through the plan");
        let answer_prompt = format!(
            "Task:\n{}\n\nPlan:\n{}\n\nFollow the plan and give the complete answer. \
             Do not repeat the plan.",
            task,
            plan.text.trim()
        );
        let answer_options = GenerationOptions::default()
            .with_system(self.instructions.clone())
            .with_temperature(0.4);
        let answer = self
            .llm
            .generate_metered(&answer_prompt, &answer_options, &ctx.usage)
            .await?;

        ctx.events.token(answer.text.clone());
        Ok(HandlerOutput::text(answer.text))
    }
}

/// Runs the deep-research workflow
pub struct DeepResearchHandler {
    workflow: Arc<DeepResearchWorkflow>,
}

impl DeepResearchHandler {
    pub fn new(workflow: Arc<DeepResearchWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl TaskHandler for DeepResearchHandler {
    async fn handle(&self, ctx: &mut TaskContext) -> Result<HandlerOutput> {
        self.workflow.run(ctx).await
    }
}

impl HandlerRegistry {
    /// Handlers for every built-in mode
    pub fn standard(
        llm: LlmClient,
        knowledge: Option<Arc<dyn KnowledgeBase>>,
        research: Arc<DeepResearchWorkflow>,
    ) -> Self {
        HandlerRegistry::new()
            .with(modes::CHAT, Arc::new(ChatHandler::new(llm.clone())))
            .with(
                modes::KNOWLEDGE_QA,
                Arc::new(KnowledgeHandler::new(llm.clone(), knowledge)),
            )
            .with(
                modes::WRITING,
                Arc::new(AnalyticalHandler::for_mode(llm.clone(), modes::WRITING)),
            )
            .with(
                modes::DATA_ANALYSIS,
                Arc::new(AnalyticalHandler::for_mode(llm.clone(), modes::DATA_ANALYSIS)),
            )
            .with(
                modes::CODE,
                Arc::new(AnalyticalHandler::for_mode(llm, modes::CODE)),
            )
            .with(
                modes::DEEP_RESEARCH,
                Arc::new(DeepResearchHandler::new(research)),
            )
    }
}
