//! Splits documents into overlapping, line-preserving chunks for embedding.

/// Split `text` into chunks of roughly `size` words, repeating up to `overlap`
/// words of trailing lines at the start of the next chunk.
///
/// Lines are kept intact unless a single line is longer than `size` words,
/// in which case it is broken into word runs. Blank lines are dropped.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));

    let mut pieces: Vec<(String, usize)> = Vec::new();
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words.len() <= size {
            pieces.push((line.trim_end().to_string(), words.len()));
        } else {
            for run in words.chunks(size) {
                pieces.push((run.join(" "), run.len()));
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<(String, usize)> = Vec::new();
    let mut count = 0;
    // Whether `current` holds anything beyond the carried-over overlap
    let mut fresh = false;

    for piece in pieces {
        if count + piece.1 > size && !current.is_empty() {
            if fresh {
                chunks.push(join(&current));
                let mut tail = Vec::new();
                let mut tail_count = 0;
                for p in current.iter().rev() {
                    if tail_count + p.1 > overlap {
                        break;
                    }
                    tail_count += p.1;
                    tail.push(p.clone());
                }
                tail.reverse();
                current = tail;
                count = tail_count;
            }
            if count + piece.1 > size {
                current.clear();
                count = 0;
            }
        }
        count += piece.1;
        current.push(piece);
        fresh = true;
    }

    if fresh && !current.is_empty() {
        chunks.push(join(&current));
    }
    chunks
}

fn join(pieces: &[(String, usize)]) -> String {
    pieces
        .iter()
        .map(|(line, _)| line.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("first line\n\nsecond line\n", 50, 10);
        assert_eq!(chunks, vec!["first line\nsecond line"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 10, 2).is_empty());
        assert!(chunk_text("\n \n", 10, 2).is_empty());
    }

    #[test]
    fn test_overlap_repeats_trailing_lines() {
        let text = "a b c\nd e f\ng h i\nj k l";
        let chunks = chunk_text(text, 6, 3);

        assert_eq!(chunks, vec!["a b c\nd e f", "d e f\ng h i", "g h i\nj k l"]);
    }

    #[test]
    fn test_long_line_split_into_runs() {
        let words: Vec<String> = (0..25).map(|i| format!("w{}", i)).collect();
        let chunks = chunk_text(&words.join(" "), 10, 0);

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks[2].ends_with("w24"));
    }

    #[test]
    fn test_indentation_preserved() {
        let chunks = chunk_text("def f():\n    return 1\n", 20, 0);
        assert_eq!(chunks, vec!["def f():\n    return 1"]);
    }
}
