//! Agent personas, stage task definitions, and prompt assembly.

use std::time::Duration;

use newsagent_retrieval::ToolSet;
use newsagent_shared::PipelineConfig;

/// Who the model is asked to be for one stage.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

/// Per-stage cost bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBounds {
    /// Generation rounds, each of which may request one tool call.
    pub max_iter: usize,
    pub max_duration: Duration,
}

/// Everything a stage needs except its tools and input context.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: &'static str,
    pub agent: AgentProfile,
    pub description: String,
    pub expected_output: String,
    pub bounds: StageBounds,
    /// Whether thought text may stand in for a final answer when a bound is hit.
    pub accepts_partial: bool,
}

pub const RESEARCH_STAGE: &str = "research";
pub const WRITING_STAGE: &str = "writing";

pub fn research_stage(topic: &str, config: &PipelineConfig) -> StageDefinition {
    StageDefinition {
        name: RESEARCH_STAGE,
        agent: AgentProfile {
            role: "Senior News Researcher".into(),
            goal: format!(
                "Uncover the latest advancements in {topic}. First search the local \
                 knowledge base, then supplement with web search if needed."
            ),
            backstory: "You are an expert researcher who turns scattered sources into \
                        clear findings. You always start with the local knowledge base, \
                        then use web search to find the most current information. You \
                        avoid repeating searches and focus on providing comprehensive \
                        insights efficiently."
                .into(),
        },
        description: format!(
            "Research comprehensive information about {topic}. SEARCH STRATEGY: use the \
             knowledge base search to find foundational research, then supplement with \
             current web information if needed. Focus on key developments, applications, \
             benefits, challenges, and future prospects. Provide a balanced analysis with \
             both established research and current trends."
        ),
        expected_output: "A comprehensive 3 paragraph research summary covering \
                          established research and current developments."
            .into(),
        bounds: StageBounds {
            max_iter: config.research_max_iter,
            max_duration: Duration::from_secs(config.research_max_secs),
        },
        accepts_partial: true,
    }
}

pub fn writing_stage(topic: &str, config: &PipelineConfig) -> StageDefinition {
    StageDefinition {
        name: WRITING_STAGE,
        agent: AgentProfile {
            role: "Content Writer".into(),
            goal: "Create a well-structured, engaging article based on research findings. \
                   Focus on clarity and accessibility."
                .into(),
            backstory: "You are a skilled writer who makes complex technical topics \
                        accessible to general audiences. You write comprehensive articles \
                        from the research you are given without doing additional searches."
                .into(),
        },
        description: format!(
            "Create an engaging article about {topic} based on the research provided. \
             Transform the research into an accessible, positive, and informative article. \
             Use the research findings as your only source."
        ),
        expected_output: format!(
            "A 4 paragraph article on {topic} advancements formatted as markdown."
        ),
        bounds: StageBounds {
            max_iter: config.writing_max_iter,
            max_duration: Duration::from_secs(config.writing_max_secs),
        },
        accepts_partial: false,
    }
}

/// Build the full prompt for one generation round.
///
/// `scratchpad` holds the previous rounds' actions and observations.
pub fn build_prompt(
    stage: &StageDefinition,
    tools: &ToolSet,
    context: Option<&str>,
    scratchpad: &str,
) -> String {
    let agent = &stage.agent;
    let mut prompt = format!(
        "You are {}. {}\nYour personal goal is: {}\n\n",
        agent.role, agent.backstory, agent.goal
    );

    if tools.is_empty() {
        prompt.push_str(
            "You have no tools. Answer directly using this format:\n\
             Final Answer: your complete answer\n\n",
        );
    } else {
        prompt.push_str(&format!(
            "You have access to the following tools, in order of priority:\n{}\n\n\
             To use a tool, respond in exactly this format:\n\
             Thought: what you are thinking\n\
             Action: the tool to use, one of [{}]\n\
             Action Input: the search query\n\n\
             When you have enough information, respond with:\n\
             Thought: I now know the final answer\n\
             Final Answer: your complete answer\n\n",
            tools.describe(),
            tools.names().join(", ")
        ));
    }

    prompt.push_str(&format!(
        "Current task: {}\n\nThis is the expected criteria for your final answer: {}\n",
        stage.description, stage.expected_output
    ));

    if let Some(context) = context {
        prompt.push_str(&format!(
            "\nThis is the context you're working with:\n{context}\n"
        ));
    }

    prompt.push_str("\nBegin!\n");
    if !scratchpad.is_empty() {
        prompt.push('\n');
        prompt.push_str(scratchpad);
    }
    prompt
}
