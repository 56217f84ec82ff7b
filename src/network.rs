// Networks: one relationship scope (role URI) per disclosure section
use crate::model::{ArcKind, Snapshot};
use bitflags::bitflags;
use serde::Serialize;
use std::collections::BTreeMap;

bitflags! {
    /// Relationship kinds present in a network.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RelationshipKinds: u8 {
        const PRESENTATION = 0b001;
        const CALCULATION  = 0b010;
        const DEFINITION   = 0b100;
    }
}

impl From<ArcKind> for RelationshipKinds {
    fn from(kind: ArcKind) -> Self {
        match kind {
            ArcKind::Presentation => RelationshipKinds::PRESENTATION,
            ArcKind::Calculation => RelationshipKinds::CALCULATION,
            ArcKind::Definition => RelationshipKinds::DEFINITION,
        }
    }
}

impl RelationshipKinds {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(3);
        if self.contains(RelationshipKinds::PRESENTATION) {
            names.push("presentation");
        }
        if self.contains(RelationshipKinds::CALCULATION) {
            names.push("calculation");
        }
        if self.contains(RelationshipKinds::DEFINITION) {
            names.push("definition");
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkCategory {
    Document,
    Statement,
    Disclosure,
    Schedule,
    Other,
}

impl NetworkCategory {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "document" => NetworkCategory::Document,
            "statement" => NetworkCategory::Statement,
            "disclosure" => NetworkCategory::Disclosure,
            "schedule" => NetworkCategory::Schedule,
            _ => NetworkCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCategory::Document => "Document",
            NetworkCategory::Statement => "Statement",
            NetworkCategory::Disclosure => "Disclosure",
            NetworkCategory::Schedule => "Schedule",
            NetworkCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub id: String,
    pub role_uri: String,
    pub sort_code: Option<String>,
    pub category: NetworkCategory,
    pub name: String,
    pub parenthetical: bool,
    pub kinds: RelationshipKinds,
}

impl Network {
    /// Splits an SEC role definition such as `"0001 - Statement - Balance Sheet"`.
    /// Definitions that do not follow the convention keep their text as the name.
    pub fn new(document_id: &str, role_uri: &str, definition: Option<&str>) -> Self {
        let fallback = || {
            role_uri
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(role_uri)
                .to_string()
        };

        let (sort_code, category, name) = match definition {
            Some(def) => {
                let parts: Vec<&str> = def.splitn(3, " - ").collect();
                match parts.as_slice() {
                    [code, category, name]
                        if !code.trim().is_empty() && code.trim().chars().all(|c| c.is_ascii_digit()) =>
                    {
                        (
                            Some(code.trim().to_string()),
                            NetworkCategory::parse(category),
                            name.trim().to_string(),
                        )
                    }
                    _ => (None, NetworkCategory::Other, def.trim().to_string()),
                }
            }
            None => (None, NetworkCategory::Other, fallback()),
        };

        Self {
            id: format!("{}:{}", document_id, role_uri),
            role_uri: role_uri.to_string(),
            parenthetical: name.to_ascii_lowercase().contains("(parenthetical)"),
            sort_code,
            category,
            name,
            kinds: RelationshipKinds::empty(),
        }
    }

    pub fn has(&self, kind: ArcKind) -> bool {
        self.kinds.contains(kind.into())
    }
}

/// Every network of the snapshot, declared or only implied by arcs, keyed by role.
pub fn collect_networks(snapshot: &Snapshot) -> BTreeMap<String, Network> {
    let mut networks: BTreeMap<String, Network> = BTreeMap::new();
    for info in &snapshot.networks {
        networks.entry(info.role_uri.clone()).or_insert_with(|| {
            Network::new(&snapshot.document_id, &info.role_uri, info.definition.as_deref())
        });
    }
    for group in &snapshot.arcs {
        let network = networks
            .entry(group.role_uri.clone())
            .or_insert_with(|| Network::new(&snapshot.document_id, &group.role_uri, None));
        if !group.arcs.is_empty() {
            network.kinds |= RelationshipKinds::from(group.kind);
        }
    }
    networks
}
