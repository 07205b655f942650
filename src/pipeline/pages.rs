//! Page selection: which pages to search for a given intent.
//!
//! An explicit reference searches every page, since a caption can sit
//! anywhere in the document. Otherwise only the pages the retrieval layer
//! considered relevant are searched; when it supplies none, the configured
//! [`RelevanceSelector`] decides.

use crate::output::ReferenceIntent;

/// Fallback relevance source used when the caller supplies no page list.
pub trait RelevanceSelector: Send + Sync {
    /// 1-indexed pages worth searching for `question`.
    fn relevant_pages(&self, document_id: &str, question: &str, total_pages: usize) -> Vec<usize>;
}

/// Selects the first `max_pages` pages of the document.
#[derive(Debug, Clone, Copy)]
pub struct LeadingPages {
    pub max_pages: usize,
}

impl Default for LeadingPages {
    fn default() -> Self {
        Self { max_pages: 3 }
    }
}

impl RelevanceSelector for LeadingPages {
    fn relevant_pages(&self, _document_id: &str, _question: &str, total_pages: usize) -> Vec<usize> {
        (1..=total_pages.min(self.max_pages)).collect()
    }
}

/// Pages to search, ascending and free of duplicates.
///
/// With a reference: `1..=total_pages`. Without: `relevant_pages` filtered
/// to `1..=total_pages`.
pub fn select(intent: &ReferenceIntent, total_pages: usize, relevant_pages: &[usize]) -> Vec<usize> {
    if intent.has_reference {
        return (1..=total_pages).collect();
    }
    let mut pages: Vec<usize> = relevant_pages
        .iter()
        .copied()
        .filter(|&p| p >= 1 && p <= total_pages)
        .collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referenced() -> ReferenceIntent {
        ReferenceIntent {
            has_reference: true,
            ..Default::default()
        }
    }

    #[test]
    fn reference_searches_every_page() {
        assert_eq!(select(&referenced(), 4, &[2]), vec![1, 2, 3, 4]);
        assert!(select(&referenced(), 0, &[]).is_empty());
    }

    #[test]
    fn no_reference_uses_relevant_pages() {
        let intent = ReferenceIntent::default();
        assert_eq!(select(&intent, 10, &[7, 3, 3, 0, 11]), vec![3, 7]);
        assert!(select(&intent, 10, &[]).is_empty());
    }

    #[test]
    fn leading_pages() {
        let sel = LeadingPages::default();
        assert_eq!(sel.relevant_pages("d", "q", 10), vec![1, 2, 3]);
        assert_eq!(sel.relevant_pages("d", "q", 2), vec![1, 2]);
        assert!(LeadingPages { max_pages: 0 }.relevant_pages("d", "q", 5).is_empty());
    }
}
