//! Outline → section plan parsing.
//!
//! An outline is loosely structured Markdown returned by the outline
//! collaborator. Only second-level headings become sections:
//!
//! ```text
//! # Título                 <- ignored (document title)
//! ## 1. Introducción       <- "Introducción"
//! ### Detalle              <- ignored (deeper heading)
//! ## Historia              <- "Historia"
//! ## Referencias           <- ignored (stop list)
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SectionTitle;

// Leading "<integer>." numbering, e.g. "2. " or "10."
static NUMBERING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.").unwrap());

const SECTION_MARKER: &str = "## ";
const DEEPER_MARKER: &str = "###";

/// Filtering rules applied while parsing an outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    /// Lowercase title prefixes that exclude a heading from the plan.
    pub stop_list: Vec<String>,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            stop_list: ["referencias", "references", "bibliografía", "bibliography"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PlanPolicy {
    fn is_stopped(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.stop_list
            .iter()
            .any(|stop| !stop.is_empty() && lower.starts_with(&stop.to_lowercase()))
    }
}

/// Extracts the ordered section plan from `outline`.
///
/// Order is preserved and duplicates are kept. An empty result is returned
/// as-is; it is the caller's job to treat it as a plan failure.
///
/// The stop list is matched after numbering is stripped, so `## 9. Referencias`
/// is excluded like `## Referencias`. Matching the raw heading would let
/// numbered reference sections through.
pub fn parse_section_plan(outline: &str, policy: &PlanPolicy) -> Vec<SectionTitle> {
    outline
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(SECTION_MARKER) && !line.starts_with(DEEPER_MARKER))
        .filter_map(|line| {
            let candidate = line[SECTION_MARKER.len()..].trim();
            let candidate = match NUMBERING_REGEX.find(candidate) {
                Some(m) => candidate[m.end()..].trim(),
                None => candidate,
            };
            if policy.is_stopped(candidate) {
                tracing::debug!(title = candidate, "Excluding stop-listed heading from plan");
                return None;
            }
            SectionTitle::new(candidate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(outline: &str) -> Vec<String> {
        parse_section_plan(outline, &PlanPolicy::default())
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect()
    }

    #[test]
    fn strips_numbering_and_excludes_references() {
        let outline = "## 1. Introducción\n## Historia\n## Referencias";
        assert_eq!(titles(outline), vec!["Introducción", "Historia"]);
    }

    #[test]
    fn ignores_title_and_deeper_headings() {
        let outline = "# Documento\n\n## Uno\n### Uno punto uno\n#### Nivel cuatro\ntexto\n## Dos\n";
        assert_eq!(titles(outline), vec!["Uno", "Dos"]);
    }

    #[test]
    fn keeps_order_and_duplicates() {
        let outline = "## Zeta\n## Alfa\n## Zeta";
        assert_eq!(titles(outline), vec!["Zeta", "Alfa", "Zeta"]);
    }

    #[test]
    fn conclusions_stay_in_the_plan() {
        let outline = "## Desarrollo\n## Conclusiones";
        assert_eq!(titles(outline), vec!["Desarrollo", "Conclusiones"]);
    }

    #[test]
    fn stop_list_is_case_insensitive_and_applies_after_numbering() {
        let outline = "## 9. REFERENCIAS\n## Bibliografía recomendada\n## References and links\n## Datos";
        assert_eq!(titles(outline), vec!["Datos"]);
    }

    #[test]
    fn indented_headings_are_trimmed() {
        let outline = "   ##   2.   Arquitectura   \n";
        assert_eq!(titles(outline), vec!["Arquitectura"]);
    }

    #[test]
    fn number_only_heading_is_dropped() {
        let outline = "## 3.\n## 4. \n## Real";
        assert_eq!(titles(outline), vec!["Real"]);
    }

    #[test]
    fn non_numeric_prefix_is_kept() {
        let outline = "## A. Anexo\n## v2.0 cambios";
        assert_eq!(titles(outline), vec!["A. Anexo", "v2.0 cambios"]);
    }

    #[test]
    fn marker_without_space_is_not_a_section() {
        let outline = "##Pegado\n## Separado";
        assert_eq!(titles(outline), vec!["Separado"]);
    }

    #[test]
    fn no_qualifying_headings_yields_empty_plan() {
        assert!(titles("# Solo título\ntexto libre\n### Profundo").is_empty());
        assert!(titles("").is_empty());
    }

    #[test]
    fn custom_stop_list_replaces_default() {
        let policy = PlanPolicy {
            stop_list: vec!["conclus".into()],
        };
        let plan = parse_section_plan("## Conclusiones\n## Referencias", &policy);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].as_str(), "Referencias");
    }
}
