//! Semantic content types, classified blocks and mind-map trees.
//!
//! `ContentType` is a closed enumeration: every tag the classifier produces
//! is one of these variants, and anything it cannot place becomes `Text`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! content_types {
    ($first:ident => $first_tag:literal, $($variant:ident => $tag:literal),+ $(,)?) => {
        /// Closed set of semantic content tags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum ContentType {
            #[default]
            $first,
            $($variant),+
        }

        impl ContentType {
            /// Every member, in declaration order.
            pub const ALL: &'static [ContentType] = &[ContentType::$first, $(ContentType::$variant),+];

            /// Canonical wire tag.
            pub fn as_str(&self) -> &'static str {
                match self {
                    ContentType::$first => $first_tag,
                    $(ContentType::$variant => $tag),+
                }
            }

            /// Exact lookup of a canonical tag. Use the classifier for anything fuzzier.
            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $first_tag => Some(ContentType::$first),
                    $($tag => Some(ContentType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

content_types! {
    Text => "text",
    Markdown => "markdown",
    Code => "code",
    Json => "json",
    Table => "table",
    List => "list",
    Thinking => "thinking",
    Reasoning => "reasoning",
    Plan => "plan",
    Progress => "progress",
    System => "system",
    Error => "error",
    Warning => "warning",
    ToolCall => "tool_call",
    ToolResult => "tool_result",
    WebSearch => "web_search",
    SearchResult => "search_result",
    KnowledgeBase => "knowledge_base",
    Citation => "citation",
    Summary => "summary",
    Analysis => "analysis",
    Evaluation => "evaluation",
    ScriptEvaluation => "script_evaluation",
    StoryOutline => "story_outline",
    EpisodeOutline => "episode_outline",
    Outline => "outline",
    Synopsis => "synopsis",
    Logline => "logline",
    StoryTreatment => "story_treatment",
    CharacterProfile => "character_profile",
    CharacterRelationship => "character_relationship",
    WorldBuilding => "world_building",
    PlotPoint => "plot_point",
    SceneBreakdown => "scene_breakdown",
    Dialogue => "dialogue",
    ScriptDraft => "script_draft",
    Storyboard => "storyboard",
    ThemeAnalysis => "theme_analysis",
    GenreAnalysis => "genre_analysis",
    MarketAnalysis => "market_analysis",
    Feedback => "feedback",
    Suggestion => "suggestion",
    Revision => "revision",
    Comparison => "comparison",
    Timeline => "timeline",
    MindMap => "mind_map",
    Document => "document",
    Image => "image",
    Billing => "billing",
    Question => "question",
    FinalAnswer => "final_answer",
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, renderable fragment of assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub content_type: ContentType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Recovered tree, only ever set on `MindMap` blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mind_map: Option<MindMapNode>,
}

/// One node of a recovered hierarchical outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindMapNode>,
}

impl MindMapNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), children: Vec::new() }
    }

    pub fn with_children(title: impl Into<String>, children: Vec<MindMapNode>) -> Self {
        Self { title: title.into(), children }
    }

    /// Total number of nodes including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MindMapNode::node_count).sum::<usize>()
    }

    /// Depth of the deepest leaf, counting this node as 1.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(MindMapNode::depth).max().unwrap_or(0)
    }
}
