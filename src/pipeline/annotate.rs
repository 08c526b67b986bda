//! Best-effort structure annotation for summary text.
//!
//! Advisory metadata only: the renderer may use it to shape output, but no
//! pipeline contract depends on it and a wrong guess costs nothing.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Heading,
    ListItem,
    Paragraph,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryAnnotation {
    /// Zero-based line index in the summary
    pub line: usize,
    pub kind: AnnotationKind,
    /// Line text with any list/heading marker stripped
    pub text: String,
}

/// Guess the structure of a summary line by line.
pub fn annotate_summary(summary: &str) -> Vec<SummaryAnnotation> {
    summary
        .lines()
        .enumerate()
        .filter_map(|(line, raw)| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            let (kind, text) = classify(trimmed);
            Some(SummaryAnnotation {
                line,
                kind,
                text: text.to_string(),
            })
        })
        .collect()
}

fn classify(line: &str) -> (AnnotationKind, &str) {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return (AnnotationKind::ListItem, rest.trim_start());
        }
    }

    // "1." / "2)" style enumerations
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 3 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return (AnnotationKind::ListItem, rest.trim_start());
        }
    }

    if let Some(rest) = line.strip_suffix(':') {
        return (AnnotationKind::Heading, rest.trim_end());
    }

    (AnnotationKind::Paragraph, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dash_and_numbered_items() {
        let summary = "Key points:\n- first item\n2. second item\nJust a sentence.";
        let annotations = annotate_summary(summary);

        assert_eq!(annotations.len(), 4);
        assert_eq!(annotations[0].kind, AnnotationKind::Heading);
        assert_eq!(annotations[0].text, "Key points");
        assert_eq!(annotations[1].kind, AnnotationKind::ListItem);
        assert_eq!(annotations[1].text, "first item");
        assert_eq!(annotations[2].kind, AnnotationKind::ListItem);
        assert_eq!(annotations[2].text, "second item");
        assert_eq!(annotations[3].kind, AnnotationKind::Paragraph);
    }

    #[test]
    fn skips_blank_lines_and_keeps_indices() {
        let annotations = annotate_summary("first\n\nthird");
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].line, 0);
        assert_eq!(annotations[1].line, 2);
    }

    #[test]
    fn plain_prose_is_paragraphs() {
        let annotations = annotate_summary("One sentence. Another one.");
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].kind, AnnotationKind::Paragraph);
    }
}
