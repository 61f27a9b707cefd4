//! Bounded execution of one pipeline stage.
//!
//! A stage alternates generation rounds and tool observations until the
//! model gives a final answer, the round cap is reached, or the wall-clock
//! budget runs out. For stages that accept partial output, thought text seen
//! along the way is returned in place of a final answer when a bound is hit.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use newsagent_retrieval::ToolSet;
use newsagent_shared::{NewsAgentError, Result};

use crate::agents::{StageDefinition, build_prompt};
use crate::llm::{GenerationOptions, GenerationRequest, TextGenerator};
use crate::throttle::RequestThrottle;

// ---------------------------------------------------------------------------
// Model turn parsing
// ---------------------------------------------------------------------------

/// What the model asked for in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTurn {
    ToolCall {
        thought: Option<String>,
        tool: String,
        input: String,
    },
    Final {
        answer: String,
    },
}

static FINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Final Answer\s*:\s*(.*)").expect("valid regex"));

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*:\s*([^\n]*?)\s*\n\s*Action Input\s*:\s*(.*)").expect("valid regex")
});

static ACTION_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Action\s*:\s*(.+?)\s*$").expect("valid regex"));

/// Parse the model's text. Text without any marker is a final answer.
pub fn parse_turn(text: &str) -> ModelTurn {
    if let Some(caps) = FINAL_RE.captures(text) {
        return ModelTurn::Final {
            answer: caps[1].trim().to_string(),
        };
    }

    let (start, tool, input) = if let Some(caps) = ACTION_RE.captures(text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        let input = caps[2]
            .split("\nObservation")
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        (start, caps[1].to_string(), input)
    } else if let Some(caps) = ACTION_ONLY_RE.captures(text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        (start, caps[1].to_string(), String::new())
    } else {
        return ModelTurn::Final {
            answer: text.trim().to_string(),
        };
    };

    let thought = text[..start].trim();
    let thought = thought.strip_prefix("Thought:").unwrap_or(thought).trim();

    ModelTurn::ToolCall {
        thought: (!thought.is_empty()).then(|| thought.to_string()),
        tool: tool.trim().to_string(),
        input,
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// What a finished stage produced and what it cost.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub text: String,
    /// Generation rounds used.
    pub rounds: usize,
    /// Tools invoked, in order.
    pub tool_calls: Vec<String>,
    /// True when a bound was hit and `text` is the accumulated thoughts.
    pub partial: bool,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Scratchpad {
    transcript: String,
    thoughts: Vec<String>,
    rounds: usize,
    tool_calls: Vec<String>,
}

impl Scratchpad {
    fn record(&mut self, raw: &str, observation: &str) {
        let raw = raw.split("\nObservation").next().unwrap_or(raw).trim_end();
        self.transcript
            .push_str(&format!("{raw}\nObservation: {observation}\n\n"));
    }

    fn partial_text(&self, stage: &StageDefinition) -> Option<String> {
        if !stage.accepts_partial || self.thoughts.is_empty() {
            return None;
        }
        Some(self.thoughts.join("\n\n"))
    }
}

/// Runs stages against a generator under the run-wide throttle.
pub struct StageExecutor {
    generator: Arc<dyn TextGenerator>,
    throttle: Arc<RequestThrottle>,
    options: GenerationOptions,
}

impl StageExecutor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        throttle: Arc<RequestThrottle>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            generator,
            throttle,
            options,
        }
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }

    /// Run `stage` to a final answer or until a bound stops it.
    #[instrument(skip_all, fields(stage = stage.name, tools = tools.names().len()))]
    pub async fn run(
        &self,
        stage: &StageDefinition,
        tools: &ToolSet,
        context: Option<&str>,
    ) -> Result<StageOutput> {
        let started = Instant::now();
        let deadline = started + stage.bounds.max_duration;
        let mut pad = Scratchpad::default();

        let outcome =
            tokio::time::timeout_at(deadline, self.rounds(stage, tools, context, &mut pad)).await;

        match outcome {
            Ok(Ok(Some(text))) => {
                info!(rounds = pad.rounds, "stage produced final answer");
                Ok(finish(text, pad, false, started))
            }
            Ok(Ok(None)) => match pad.partial_text(stage) {
                Some(text) => {
                    warn!(limit = stage.bounds.max_iter, "round cap reached, using partial output");
                    Ok(finish(text, pad, true, started))
                }
                None => Err(NewsAgentError::StageIterationLimit {
                    stage: stage.name.to_string(),
                    limit: stage.bounds.max_iter,
                }),
            },
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => match pad.partial_text(stage) {
                Some(text) => {
                    warn!(
                        budget_secs = stage.bounds.max_duration.as_secs(),
                        "stage deadline reached, using partial output"
                    );
                    Ok(finish(text, pad, true, started))
                }
                None => Err(NewsAgentError::StageTimeout {
                    stage: stage.name.to_string(),
                    budget: stage.bounds.max_duration,
                }),
            },
        }
    }

    /// `Ok(None)` means the round cap ran out without a final answer.
    async fn rounds(
        &self,
        stage: &StageDefinition,
        tools: &ToolSet,
        context: Option<&str>,
        pad: &mut Scratchpad,
    ) -> Result<Option<String>> {
        let limit = stage.bounds.max_iter;

        while pad.rounds < limit {
            pad.rounds += 1;
            let request = GenerationRequest {
                prompt: build_prompt(stage, tools, context, &pad.transcript),
                options: self.options,
            };

            self.throttle.acquire().await;
            let raw = self.generator.generate(&request).await?;

            match parse_turn(&raw) {
                ModelTurn::Final { answer } => return Ok(Some(answer)),
                ModelTurn::ToolCall {
                    thought,
                    tool,
                    input,
                } => {
                    if let Some(thought) = thought {
                        pad.thoughts.push(thought);
                    }
                    if pad.rounds == limit {
                        debug!(tool = %tool, "last round, skipping tool call");
                        break;
                    }

                    self.throttle.acquire().await;
                    let call = tools.call(&tool, &input).await;
                    debug!(
                        tool = %call.tool,
                        known = call.known,
                        observation_chars = call.observation.len(),
                        "tool observation"
                    );
                    if call.known {
                        pad.tool_calls.push(call.tool.clone());
                    }
                    pad.record(&raw, &call.observation);
                }
            }
        }

        Ok(None)
    }
}

fn finish(text: String, pad: Scratchpad, partial: bool, started: Instant) -> StageOutput {
    StageOutput {
        text,
        rounds: pad.rounds,
        tool_calls: pad.tool_calls,
        partial,
        elapsed: started.elapsed(),
    }
}
