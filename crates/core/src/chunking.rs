use crate::error::PipelineError;
use crate::models::PipelineOptions;
use std::collections::VecDeque;

/// Break points tried in order: paragraph, line, sentence, word, character.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

const ALLOWED_PUNCTUATION: [char; 5] = ['.', ',', '!', '?', '-'];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses whitespace, then drops every character that is not alphanumeric,
/// whitespace or one of `. , ! ? -`. Total: never fails, `""` maps to `""`.
pub fn normalize_text(text: &str) -> String {
    normalize_whitespace(text)
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c))
        .collect()
}

/// Recursive character splitter with overlap.
///
/// Picks the first separator present in the text, splits on it (the separator
/// stays attached to the start of the following piece), recurses into pieces
/// that are still too long with the remaining separators, and greedily merges
/// short pieces back together. Every emitted chunk is trimmed, non-empty and at
/// most `chunk_size` characters long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, PipelineError> {
        if chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_options(options: &PipelineOptions) -> Result<Self, PipelineError> {
        Self::new(options.chunk_size, options.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
            .into_iter()
            .filter_map(|chunk| {
                let trimmed = chunk.trim();
                if trimmed.is_empty() {
                    None
                } else if trimmed.len() == chunk.len() {
                    Some(chunk)
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = match separators
            .iter()
            .position(|separator| separator.is_empty() || text.contains(separator))
        {
            Some(position) if separators[position].is_empty() => ("", &separators[..0]),
            Some(position) => (separators[position], &separators[position + 1..]),
            None => ("", &separators[..0]),
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Joins pieces shorter than `chunk_size` into chunks, keeping up to
    /// `chunk_overlap` characters of trailing pieces as the head of the next one.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let length = char_len(piece);

            if total + length > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);

                while total > self.chunk_overlap
                    || (total + length > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some(dropped) => total -= char_len(dropped),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += length;
        }

        if !window.is_empty() {
            push_joined(&mut chunks, &window);
        }

        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined = window.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, c)| &text[start..start + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing\u{a0}here ";
        assert_eq!(normalize_whitespace(input), "A lot of spacing here");
    }

    #[test]
    fn normalization_strips_disallowed_characters() {
        let input = "  Hello,\n\n world! (Really?) #tags & more -- done.  ";
        assert_eq!(normalize_text(input), "Hello, world! Really? tags  more -- done.");
    }

    #[test]
    fn normalization_is_total_on_empty_input() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n\t "), "");
    }

    #[test]
    fn splitter_rejects_overlap_not_below_size() {
        assert!(TextSplitter::new(10, 10).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(10, 9).is_ok());
    }

    #[test]
    fn empty_text_has_no_chunks() -> Result<(), PipelineError> {
        let splitter = TextSplitter::new(20, 5)?;
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   ").is_empty());
        Ok(())
    }

    #[test]
    fn short_text_is_a_single_chunk() -> Result<(), PipelineError> {
        let splitter = TextSplitter::from_options(&PipelineOptions::default())?;
        assert_eq!(splitter.split("Apples are red fruits."), vec!["Apples are red fruits."]);
        Ok(())
    }

    #[test]
    fn sentences_split_at_word_boundaries_with_overlap() -> Result<(), PipelineError> {
        let splitter = TextSplitter::new(20, 5)?;
        let chunks = splitter.split("The cat sat on the mat. The dog ran in the park.");

        assert_eq!(
            chunks,
            vec![
                "The cat sat on the",
                "the mat",
                ". The dog ran in the",
                "the park.",
            ]
        );
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
        assert!(chunks[0].ends_with("the") && chunks[1].starts_with("the"));
        assert!(chunks[2].ends_with("the") && chunks[3].starts_with("the"));
        Ok(())
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() -> Result<(), PipelineError> {
        let splitter = TextSplitter::new(4, 1)?;
        let chunks = splitter.split("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
        Ok(())
    }

    #[test]
    fn paragraphs_are_preferred_over_sentences() -> Result<(), PipelineError> {
        let splitter = TextSplitter::new(30, 0)?;
        let chunks = splitter.split("First paragraph here.\n\nSecond one. Short.");
        assert_eq!(chunks, vec!["First paragraph here.", "Second one. Short."]);
        Ok(())
    }

    #[test]
    fn chunk_bound_holds_for_multibyte_text() -> Result<(), PipelineError> {
        let splitter = TextSplitter::new(7, 2)?;
        let text = "Grüße aus Köln, schöne Grüße zurück nach Zürich.";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 7));
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
        Ok(())
    }
}
