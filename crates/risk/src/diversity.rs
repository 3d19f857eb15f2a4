use std::collections::HashMap;

const WINDOW_SIZE: usize = 100;
const MAX_TEMPLATES: usize = 50;
const SIMILARITY_SAMPLE: usize = 20;

/// Per-account ring of recent outbound message texts plus their induced
/// templates, used to score message variety and flag repetitive spam.
#[derive(Debug, Clone, Default)]
pub struct DiversityWindow {
    messages: Vec<String>,
    templates: Vec<String>,
}

/// A spam pattern found in the window, with the triggering reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamPattern {
    ExactDuplicate,
    TemplateDominance,
}

impl DiversityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly sent message and return a spam pattern if this push
    /// tripped the duplicate or template-dominance detector.
    pub fn push(&mut self, text: &str) -> Option<SpamPattern> {
        let template = extract_template(text);

        self.messages.push(text.to_string());
        if self.messages.len() > WINDOW_SIZE {
            self.messages.remove(0);
        }

        self.templates.push(template);
        if self.templates.len() > MAX_TEMPLATES {
            self.templates.remove(0);
        }

        self.detect_spam()
    }

    fn detect_spam(&self) -> Option<SpamPattern> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for m in &self.messages {
            *counts.entry(m.as_str()).or_insert(0) += 1;
        }
        if counts.values().any(|&c| c >= 5) {
            return Some(SpamPattern::ExactDuplicate);
        }

        if self.templates.len() >= 10 {
            let mut template_counts: HashMap<&str, usize> = HashMap::new();
            for t in &self.templates {
                *template_counts.entry(t.as_str()).or_insert(0) += 1;
            }
            if let Some(&max_count) = template_counts.values().max() {
                let ratio = max_count as f64 / self.templates.len() as f64;
                if ratio >= 0.7 {
                    return Some(SpamPattern::TemplateDominance);
                }
            }
        }

        None
    }

    /// Weighted diversity score in [0,1]; higher means more varied.
    pub fn score(&self) -> f64 {
        if self.messages.is_empty() {
            return 1.0;
        }

        let unique_messages: std::collections::HashSet<&str> =
            self.messages.iter().map(|s| s.as_str()).collect();
        let unique_ratio = unique_messages.len() as f64 / self.messages.len() as f64;

        let unique_templates: std::collections::HashSet<&str> =
            self.templates.iter().map(|s| s.as_str()).collect();
        let template_ratio = if self.templates.is_empty() {
            1.0
        } else {
            unique_templates.len() as f64 / self.templates.len() as f64
        };

        let similarity_diversity = self.pairwise_similarity_diversity();

        (unique_ratio * 0.3 + template_ratio * 0.4 + similarity_diversity * 0.3).clamp(0.0, 1.0)
    }

    fn pairwise_similarity_diversity(&self) -> f64 {
        let recent: Vec<&String> = self
            .messages
            .iter()
            .rev()
            .take(SIMILARITY_SAMPLE)
            .collect();
        if recent.len() < 2 {
            return 1.0;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..recent.len() {
            for j in (i + 1)..recent.len() {
                total += jaccard_words(recent[i], recent[j]);
                pairs += 1;
            }
        }
        if pairs == 0 {
            return 1.0;
        }
        1.0 - (total / pairs as f64)
    }
}

fn jaccard_words(a: &str, b: &str) -> f64 {
    let wa: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let wb: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if wa.is_empty() && wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Replace digit runs, mentions and capitalized tokens with placeholders so
/// structurally identical messages collapse onto the same template.
pub fn extract_template(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '@' {
            out.push_str("{USER}");
            while matches!(chars.peek(), Some(ch) if ch.is_alphanumeric() || *ch == '_') {
                chars.next();
            }
        } else if c.is_ascii_digit() {
            out.push_str("{NUM}");
            while matches!(chars.peek(), Some(ch) if ch.is_ascii_digit()) {
                chars.next();
            }
        } else if c.is_uppercase() {
            while matches!(chars.peek(), Some(ch) if ch.is_alphanumeric()) {
                chars.next();
            }
            out.push_str("{NAME}");
        } else {
            out.push(c);
        }
    }

    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
