//! Tracked title data structures.

use serde::{Deserialize, Serialize};

/// Content class of a title; the two classes use different id and URL conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Webtoon,
    Challenge,
}

impl ContentType {
    /// Prefix used inside comment page ids.
    pub fn page_prefix(self) -> &'static str {
        match self {
            ContentType::Webtoon => "w",
            ContentType::Challenge => "bc",
        }
    }

    /// Path segment used by the episode list page.
    pub fn list_path(self) -> &'static str {
        match self {
            ContentType::Webtoon => "webtoon",
            ContentType::Challenge => "bestChallenge",
        }
    }
}

/// A tracked series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub id: u64,
    pub kind: ContentType,
    pub name: String,
}

impl Title {
    /// Comment page id for one episode (`w_1_1`).
    pub fn page_id(&self, episode: u32) -> String {
        format!("{}_{}_{}", self.kind.page_prefix(), self.id, episode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_uses_type_prefix() {
        let webtoon = Title {
            id: 1,
            kind: ContentType::Webtoon,
            name: "A".into(),
        };
        let challenge = Title {
            id: 77,
            kind: ContentType::Challenge,
            name: "B".into(),
        };
        assert_eq!(webtoon.page_id(1), "w_1_1");
        assert_eq!(challenge.page_id(12), "bc_77_12");
    }

    #[test]
    fn kind_deserializes_from_snake_case() {
        let title: Title =
            toml::from_str("id = 5\nkind = \"challenge\"\nname = \"Side Story\"").unwrap();
        assert_eq!(title.kind, ContentType::Challenge);
    }
}
