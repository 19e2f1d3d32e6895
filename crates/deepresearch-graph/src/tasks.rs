use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ResearcherConfig;
use crate::runnable::ChatMessage;

pub(crate) const QUESTION_KEY: &str = "question";
pub(crate) const CONFIG_KEY: &str = "config";
pub(crate) const MESSAGES_KEY: &str = "messages";
pub(crate) const BRIEF_KEY: &str = "research.brief";
pub(crate) const PENDING_TOPICS_KEY: &str = "research.pending_topics";
pub(crate) const ITERATION_KEY: &str = "supervisor.iteration";
pub(crate) const MORE_WORK_KEY: &str = "supervisor.more_work";
pub(crate) const NOTES_KEY: &str = "research.notes";
pub(crate) const COMPRESSED_KEY: &str = "research.compressed";
pub(crate) const REPORT_KEY: &str = "final.report";
pub(crate) const CLARIFICATION_KEY: &str = "clarification.requested";
pub(crate) const STAGES_KEY: &str = "stages";

/// Questions shorter than this are considered too vague to research directly.
const MIN_QUESTION_WORDS: usize = 4;
/// Simulated searches a single researcher performs per topic, before the tool-call cap applies.
const SEARCHES_PER_TOPIC: u32 = 3;

/// A single finding gathered by a researcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNote {
    pub topic: String,
    pub content: String,
    pub source: Option<String>,
}

/// Which model backed a stage and with what output cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub model: String,
    pub max_tokens: u32,
}

async fn load_config(context: &Context) -> ResearcherConfig {
    context.get(CONFIG_KEY).await.unwrap_or_default()
}

async fn record_stage(context: &Context, stage: &str, model: &str, max_tokens: u32) {
    let mut stages: Vec<StageRecord> = context.get(STAGES_KEY).await.unwrap_or_default();
    stages.push(StageRecord {
        stage: stage.to_string(),
        model: model.to_string(),
        max_tokens,
    });
    context.set(STAGES_KEY, &stages).await;
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max_words` whitespace-separated words, used as a token budget proxy.
pub(crate) fn truncate_words(text: &str, max_words: usize) -> String {
    if word_count(text) <= max_words {
        return text.to_string();
    }
    let mut kept = 0;
    let mut output = String::new();
    for line in text.lines() {
        let mut line_words = Vec::new();
        for word in line.split_whitespace() {
            if kept == max_words {
                break;
            }
            line_words.push(word);
            kept += 1;
        }
        if !line_words.is_empty() || kept < max_words {
            output.push_str(&line_words.join(" "));
            output.push('\n');
        }
        if kept == max_words {
            break;
        }
    }
    output.trim_end().to_string()
}

/// Split a question into independent research topics.
pub(crate) fn split_topics(question: &str) -> Vec<String> {
    let topics: Vec<String> = question
        .split([',', ';'])
        .flat_map(|part| part.split(" and "))
        .map(|part| part.trim().trim_end_matches('?').trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();

    if topics.is_empty() {
        vec![question.trim().to_string()]
    } else {
        topics
    }
}

fn slug(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[derive(Default)]
pub struct ClarifyTask;

#[async_trait]
impl Task for ClarifyTask {
    fn id(&self) -> &str {
        "clarify_with_user"
    }

    #[instrument(name = "task.clarify", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let config = load_config(&context).await;
        let question: String = context.get(QUESTION_KEY).await.unwrap_or_default();

        if !config.allow_clarification || word_count(&question) >= MIN_QUESTION_WORDS {
            context.set(CLARIFICATION_KEY, false).await;
            debug!(
                allow_clarification = config.allow_clarification,
                "skipping clarification"
            );
            return Ok(TaskResult::new(None, NextAction::ContinueAndExecute));
        }

        record_stage(
            &context,
            self.id(),
            &config.research_model,
            config.research_model_max_tokens,
        )
        .await;

        let clarification = format!(
            "Could you clarify the scope of \"{}\"? Please describe the specific aspects, time frame, or region you want researched.",
            question.trim()
        );
        let mut messages: Vec<ChatMessage> = context.get(MESSAGES_KEY).await.unwrap_or_default();
        messages.push(ChatMessage::assistant(clarification.clone()));
        context.set(MESSAGES_KEY, &messages).await;
        context.set(CLARIFICATION_KEY, true).await;

        info!(%question, "requesting clarification before research");

        Ok(TaskResult::new(Some(clarification), NextAction::End))
    }
}

#[derive(Default)]
pub struct ResearchBriefTask;

#[async_trait]
impl Task for ResearchBriefTask {
    fn id(&self) -> &str {
        "write_research_brief"
    }

    #[instrument(name = "task.research_brief", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let config = load_config(&context).await;
        let question: String = context.get(QUESTION_KEY).await.unwrap_or_default();

        record_stage(
            &context,
            self.id(),
            &config.research_model,
            config.research_model_max_tokens,
        )
        .await;

        let topics = split_topics(&question);
        let brief = format!(
            "Investigate \"{}\" across {} topic(s): {}",
            question.trim(),
            topics.len(),
            topics.join("; ")
        );

        context.set(BRIEF_KEY, &brief).await;
        context.set(PENDING_TOPICS_KEY, &topics).await;
        context.set(ITERATION_KEY, 0u32).await;

        info!(
            topics = topics.len(),
            retries = config.max_structured_output_retries,
            "research brief written"
        );

        Ok(TaskResult::new(
            Some(brief),
            NextAction::ContinueAndExecute,
        ))
    }
}

#[derive(Default)]
pub struct SupervisorTask;

#[async_trait]
impl Task for SupervisorTask {
    fn id(&self) -> &str {
        "research_supervisor"
    }

    #[instrument(name = "task.supervisor", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let config = load_config(&context).await;
        let mut pending: Vec<String> = context.get(PENDING_TOPICS_KEY).await.unwrap_or_default();
        let iteration: u32 = context.get::<u32>(ITERATION_KEY).await.unwrap_or(0) + 1;
        let mut notes: Vec<ResearchNote> = context.get(NOTES_KEY).await.unwrap_or_default();

        record_stage(
            &context,
            self.id(),
            &config.research_model,
            config.research_model_max_tokens,
        )
        .await;

        let units = (config.max_concurrent_research_units.max(1) as usize).min(pending.len());
        let dispatched: Vec<String> = pending.drain(..units).collect();
        let searches = SEARCHES_PER_TOPIC.min(config.max_react_tool_calls);

        for topic in &dispatched {
            if searches == 0 {
                notes.push(ResearchNote {
                    topic: topic.clone(),
                    content: format!("No searches were permitted while researching {topic}."),
                    source: None,
                });
                continue;
            }
            for call in 1..=searches {
                notes.push(ResearchNote {
                    topic: topic.clone(),
                    content: format!(
                        "Finding {call} on {topic}: evidence gathered through {} search.",
                        config.search_api
                    ),
                    source: Some(format!(
                        "https://example.com/{}/{}?result={call}",
                        slug(&config.search_api),
                        slug(topic)
                    )),
                });
            }
        }

        if searches > 0 && !dispatched.is_empty() {
            record_stage(
                &context,
                "summarize_search_results",
                &config.summarization_model,
                config.summarization_model_max_tokens,
            )
            .await;
        }

        let more_work = !pending.is_empty() && iteration < config.max_researcher_iterations.max(1);

        context.set(PENDING_TOPICS_KEY, &pending).await;
        context.set(ITERATION_KEY, iteration).await;
        context.set(NOTES_KEY, &notes).await;
        context.set_sync(MORE_WORK_KEY, more_work);

        info!(
            iteration,
            dispatched = dispatched.len(),
            remaining = pending.len(),
            more_work,
            "supervisor iteration complete"
        );

        Ok(TaskResult::new(
            Some(format!(
                "Iteration {iteration} researched {} topic(s)",
                dispatched.len()
            )),
            NextAction::ContinueAndExecute,
        ))
    }
}

#[derive(Default)]
pub struct CompressTask;

#[async_trait]
impl Task for CompressTask {
    fn id(&self) -> &str {
        "compress_research"
    }

    #[instrument(name = "task.compress", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let config = load_config(&context).await;
        let notes: Vec<ResearchNote> = context.get(NOTES_KEY).await.unwrap_or_default();

        record_stage(
            &context,
            self.id(),
            &config.compression_model,
            config.compression_model_max_tokens,
        )
        .await;

        let mut budget = config.compression_model_max_tokens as usize;
        let mut compressed: Vec<ResearchNote> = Vec::new();
        for note in notes {
            if budget == 0 {
                break;
            }
            if compressed
                .iter()
                .any(|kept| kept.content == note.content && kept.source == note.source)
            {
                continue;
            }
            let content = truncate_words(&note.content, budget);
            budget = budget.saturating_sub(word_count(&content));
            compressed.push(ResearchNote { content, ..note });
        }

        context.set(COMPRESSED_KEY, &compressed).await;

        debug!(kept = compressed.len(), "research notes compressed");

        Ok(TaskResult::new(
            Some(format!("Compressed {} note(s)", compressed.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

#[derive(Default)]
pub struct FinalReportTask;

#[async_trait]
impl Task for FinalReportTask {
    fn id(&self) -> &str {
        "final_report_generation"
    }

    #[instrument(name = "task.final_report", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let config = load_config(&context).await;
        let question: String = context.get(QUESTION_KEY).await.unwrap_or_default();
        let brief: String = context.get(BRIEF_KEY).await.unwrap_or_default();
        let notes: Vec<ResearchNote> = context.get(COMPRESSED_KEY).await.unwrap_or_default();

        record_stage(
            &context,
            self.id(),
            &config.final_report_model,
            config.final_report_model_max_tokens,
        )
        .await;

        let report = truncate_words(
            &render_report(&question, &brief, &config.search_api, &notes),
            config.final_report_model_max_tokens as usize,
        );

        let mut messages: Vec<ChatMessage> = context.get(MESSAGES_KEY).await.unwrap_or_default();
        messages.push(ChatMessage::assistant(report.clone()));
        context.set(MESSAGES_KEY, &messages).await;
        context.set(REPORT_KEY, &report).await;

        info!(
            words = word_count(&report),
            notes = notes.len(),
            "final report generated"
        );

        Ok(TaskResult::new(Some(report), NextAction::End))
    }
}

fn render_report(question: &str, brief: &str, search_api: &str, notes: &[ResearchNote]) -> String {
    let mut sources: Vec<&str> = Vec::new();
    let mut topics: Vec<&str> = Vec::new();
    for note in notes {
        if !topics.contains(&note.topic.as_str()) {
            topics.push(&note.topic);
        }
        if let Some(source) = note.source.as_deref() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
    }

    let mut report = format!(
        "# Research Report: {}\n\n## Summary\n\n{}. The research covered {} topic(s) using {} search.\n\n## Findings\n",
        question.trim(),
        brief,
        topics.len(),
        search_api
    );

    for topic in &topics {
        report.push_str(&format!("\n### {topic}\n\n"));
        for note in notes.iter().filter(|note| note.topic == *topic) {
            match note.source.as_deref() {
                Some(source) => {
                    let index = sources
                        .iter()
                        .position(|known| *known == source)
                        .map(|idx| idx + 1)
                        .unwrap_or_default();
                    report.push_str(&format!("{} [{index}]\n\n", note.content));
                }
                None => report.push_str(&format!("{}\n\n", note.content)),
            }
        }
    }

    report.push_str("\n## Sources\n\n");
    if sources.is_empty() {
        report.push_str("(none recorded)\n");
    } else {
        for (idx, source) in sources.iter().enumerate() {
            report.push_str(&format!("[{}] {}\n", idx + 1, source));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_split_on_separators() {
        let topics = split_topics("Battery supply chains, recycling policy and pricing in 2024?");
        assert_eq!(
            topics,
            vec![
                "Battery supply chains".to_string(),
                "recycling policy".to_string(),
                "pricing in 2024".to_string()
            ]
        );
        assert_eq!(split_topics("   "), vec![String::new()]);
    }

    #[test]
    fn truncation_keeps_line_structure() {
        let text = "one two three\nfour five\nsix";
        assert_eq!(truncate_words(text, 10), text);
        assert_eq!(truncate_words(text, 4), "one two three\nfour");
        assert_eq!(truncate_words(text, 0), "");
    }

    #[test]
    fn report_cites_every_source() {
        let notes = vec![
            ResearchNote {
                topic: "supply".to_string(),
                content: "Supply is tight".to_string(),
                source: Some("https://example.com/a".to_string()),
            },
            ResearchNote {
                topic: "demand".to_string(),
                content: "Demand grows".to_string(),
                source: Some("https://example.com/b".to_string()),
            },
        ];
        let report = render_report("supply and demand", "brief", "tavily", &notes);
        assert!(report.starts_with("# Research Report: supply and demand"));
        assert!(report.contains("Supply is tight [1]"));
        assert!(report.contains("Demand grows [2]"));
        assert!(report.contains("## Sources"));
        assert!(report.contains("[2] https://example.com/b"));
    }
}
