use sl_base::content::ContentType;

/// Substring rules, checked in order against the normalized tag.
/// More specific needles come before the general ones they contain.
const RULES: &[(&str, ContentType)] = &[
    ("script_eval", ContentType::ScriptEvaluation),
    ("story_outline", ContentType::StoryOutline),
    ("episode_outline", ContentType::EpisodeOutline),
    ("treatment", ContentType::StoryTreatment),
    ("character_relationship", ContentType::CharacterRelationship),
    ("relationship", ContentType::CharacterRelationship),
    ("character", ContentType::CharacterProfile),
    ("world_build", ContentType::WorldBuilding),
    ("worldbuilding", ContentType::WorldBuilding),
    ("plot_point", ContentType::PlotPoint),
    ("scene", ContentType::SceneBreakdown),
    ("dialog", ContentType::Dialogue),
    ("script_draft", ContentType::ScriptDraft),
    ("screenplay", ContentType::ScriptDraft),
    ("storyboard", ContentType::Storyboard),
    ("theme", ContentType::ThemeAnalysis),
    ("genre", ContentType::GenreAnalysis),
    ("market", ContentType::MarketAnalysis),
    ("mind_map", ContentType::MindMap),
    ("mindmap", ContentType::MindMap),
    ("tool_call", ContentType::ToolCall),
    ("tool_result", ContentType::ToolResult),
    ("tool_return", ContentType::ToolResult),
    ("web_search", ContentType::WebSearch),
    ("search_result", ContentType::SearchResult),
    ("knowledge", ContentType::KnowledgeBase),
    ("search", ContentType::SearchResult),
    ("citation", ContentType::Citation),
    ("final_answer", ContentType::FinalAnswer),
    ("evaluation", ContentType::Evaluation),
    ("review", ContentType::Evaluation),
    ("analysis", ContentType::Analysis),
    ("outline", ContentType::Outline),
    ("synopsis", ContentType::Synopsis),
    ("logline", ContentType::Logline),
    ("summary", ContentType::Summary),
    ("thinking", ContentType::Thinking),
    ("thought", ContentType::Thinking),
    ("reasoning", ContentType::Reasoning),
    ("plan", ContentType::Plan),
    ("progress", ContentType::Progress),
    ("feedback", ContentType::Feedback),
    ("suggestion", ContentType::Suggestion),
    ("revision", ContentType::Revision),
    ("comparison", ContentType::Comparison),
    ("timeline", ContentType::Timeline),
    ("billing", ContentType::Billing),
    ("question", ContentType::Question),
    ("warning", ContentType::Warning),
    ("error", ContentType::Error),
    ("system", ContentType::System),
    ("document", ContentType::Document),
    ("image", ContentType::Image),
    ("table", ContentType::Table),
    ("json", ContentType::Json),
    ("code", ContentType::Code),
    ("markdown", ContentType::Markdown),
    ("list", ContentType::List),
];

fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | ' ' | '.' | '/') { '_' } else { c })
        .collect()
}

/// Map a raw content-type tag onto the closed enumeration. Total: anything
/// unrecognised becomes `Text`.
pub fn classify(raw: &str) -> ContentType {
    let tag = normalize(raw);
    if tag.is_empty() {
        return ContentType::Text;
    }
    if let Some(exact) = ContentType::from_tag(&tag) {
        return exact;
    }
    match RULES.iter().find(|(needle, _)| tag.contains(needle)) {
        Some((_, ct)) => *ct,
        None => {
            tracing::debug!(tag = raw, "unclassified content type, using text");
            ContentType::Text
        }
    }
}
