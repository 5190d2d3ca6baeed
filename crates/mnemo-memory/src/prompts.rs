//! 生命周期各阶段的模型提示

pub const RECALL_SELECTION_PROMPT: &str = r#"You select long-term memory files for an assistant.

You are given a query and a mind map of the memory store: an XML tree of folder and file names, without content.
Choose only the files that are genuinely relevant to the query. Be selective, not exhaustive.
Files under the archive folder are retired memories; never select them.
If nothing is genuinely relevant, return an empty list.

Return JSON: {"files": ["relative/path.md", ...]} using paths built from the folder and file names."#;

pub const REFLECTION_SYNTHESIS_PROMPT: &str = r#"You maintain the short-term memory of an assistant.

Read the working context and extract what must survive once the context is compressed:
- summary: a short paragraph describing what happened
- key_facts: durable facts and decisions, one per item
- goals: the user's open or completed goals
- tasks: concrete actionable tasks, marked completed when done

Do not repeat facts that are already listed in the current short-term memory."#;

pub const REFLECTION_CONDENSE_PROMPT: &str = r#"Restate the remaining working context as an ultra-concise summary.
Keep only what is needed to continue the conversation. Facts already saved to short-term memory can be omitted.
Reply with the summary text only."#;

pub const PROMOTION_CANDIDATES_PROMPT: &str = r#"You decide what moves from short-term memory into long-term memory.

Be selective. Only two kinds of information qualify:
- semantic: durable facts about the user, their projects or preferences that will matter in future sessions
- episodic: notable events worth remembering later

Transient chatter, in-progress details and anything already obvious do not qualify.
For each candidate give a title, the content as markdown, tags, a suggested relative path such as "projects/mnemo.md", and its kind.
Return JSON: {"candidates": [...]}. Return an empty list if nothing qualifies."#;

pub const PROMOTION_RELATED_PROMPT: &str = r#"You are given a candidate long-term memory and a mind map of existing memory files.
If one existing file covers the same subject, so the candidate should be appended to it, return its relative path.
Otherwise return null.

Return JSON: {"path": "relative/path.md"} or {"path": null}."#;

pub const PROMOTION_REWRITE_PROMPT: &str = r#"Rewrite the short-term memory after promotion.

The listed candidates have been saved to long-term memory. Remove them and anything redundant.
Keep only recent, actionable context: open goals, pending tasks and the latest events.
The result must be shorter than the input. Return the full short-term memory structure as JSON."#;

pub const ORGANIZATION_PROMPT: &str = r#"You reorganize the long-term memory store of an assistant.

You are given the mind map of the store and an analysis of recent access patterns:
per-file access counts, files read together in the same session, and files with no recent access.
Propose a small number of refactoring operations:
- strengthen_relation {source, target, reason}: files that are used together
- move_memory {from, to, reason}: a file that belongs in a better folder
- archive_memory {path, reason}: a stale file that is no longer useful
- consolidate_memories {sources, target, content, reason}: overlapping files merged into one, with the merged markdown content

Only use paths that appear in the mind map. Return JSON: {"operations": [...]}. Return an empty list when the store is already well organized."#;

/// 带标题的上下文段落
pub fn section(title: &str, body: &str) -> String {
    format!("## {}\n{}\n", title, body.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section() {
        assert_eq!(section("Query", "rust\n\n"), "## Query\nrust\n");
    }

    #[test]
    fn test_prompts_ask_for_json() {
        for prompt in [
            RECALL_SELECTION_PROMPT,
            PROMOTION_CANDIDATES_PROMPT,
            PROMOTION_RELATED_PROMPT,
            ORGANIZATION_PROMPT,
        ] {
            assert!(prompt.contains("JSON"));
        }
    }
}
