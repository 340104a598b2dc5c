//! Per-line Smith-Waterman scoring for fuzzy grep.
//!
//! All needle characters must appear in order; the alignment picks the
//! placement that favours contiguous runs and word-boundary starts. The
//! traceback yields the matched byte positions so highlight ranges come
//! from the alignment itself, not from a literal re-search.

const MATCH_BONUS: i32 = 16;
const CONSECUTIVE_BONUS: i32 = 8;
const BOUNDARY_BONUS: i32 = 8;
const FIRST_CHAR_BONUS: i32 = 4;
const GAP_OPEN: i32 = 3;
const GAP_EXTEND: i32 = 1;

/// Minimum per-needle-char score for a line to count as a real match.
/// Exact substring hits bypass the threshold.
const QUALITY_THRESHOLD_PER_CHAR: i32 = 20;

/// Lines are aligned only within this prefix; grepping minified bundles
/// must not turn quadratic.
const MAX_ALIGN_CHARS: usize = 1024;

const NEG_INF: i32 = i32::MIN / 2;

/// One scored line: alignment score and the byte range of every matched
/// character, merged into contiguous `(start, end)` spans.
#[derive(Debug, Clone)]
pub struct LineMatch {
    pub score: u16,
    pub ranges: Vec<(u32, u32)>,
    pub exact: bool,
}

/// Score `needle` against `line`. Returns `None` when the needle is not a
/// subsequence of the line or the alignment quality is below threshold.
pub fn score_line(needle: &str, line: &str, case_sensitive: bool) -> Option<LineMatch> {
    if needle.is_empty() {
        return None;
    }

    // Exact substring: best possible placement, skip the alignment.
    if let Some(range) = find_exact(needle, line, case_sensitive) {
        let chars = needle.chars().count() as i32;
        let score = (chars * (MATCH_BONUS + CONSECUTIVE_BONUS)).min(u16::MAX as i32) as u16;
        return Some(LineMatch {
            score,
            ranges: vec![range],
            exact: true,
        });
    }

    let needle_chars: Vec<char> = needle
        .chars()
        .map(|c| fold_char(c, case_sensitive))
        .collect();

    // (byte_offset, byte_len, folded_char, starts_word)
    let mut line_chars: Vec<(u32, u8, char, bool)> = Vec::new();
    let mut prev: Option<char> = None;
    for (offset, c) in line.char_indices().take(MAX_ALIGN_CHARS) {
        let boundary = prev.is_none_or(|p| !p.is_alphanumeric());
        line_chars.push((
            offset as u32,
            c.len_utf8() as u8,
            fold_char(c, case_sensitive),
            boundary,
        ));
        prev = Some(c);
    }

    let n = needle_chars.len();
    let m = line_chars.len();
    if n > m {
        return None;
    }

    // rows[i][j]: best score with needle[i] matched exactly at line char j
    let mut rows: Vec<Vec<i32>> = Vec::with_capacity(n);

    for (i, &nc) in needle_chars.iter().enumerate() {
        let mut row = vec![NEG_INF; m];
        // carry: best prev-row score for predecessors left of j-1, with the
        // gap penalty accumulated incrementally
        let mut carry = NEG_INF;

        for j in 0..m {
            let (_, _, lc, boundary) = line_chars[j];

            // carry covers predecessors k <= j-2: a gap of g skipped chars
            // costs GAP_OPEN + (g-1)*GAP_EXTEND. k == j-1 is the consecutive
            // case below.
            if i > 0 && j >= 2 {
                let prev_row = &rows[i - 1];
                carry = carry
                    .saturating_sub(GAP_EXTEND)
                    .max(prev_row[j - 2].saturating_sub(GAP_OPEN));
            }

            if lc != nc {
                continue;
            }

            let placement = if i == 0 {
                let mut bonus = FIRST_CHAR_BONUS;
                if boundary {
                    bonus += BOUNDARY_BONUS;
                }
                bonus
            } else {
                let consecutive = if j > 0 { rows[i - 1][j - 1] } else { NEG_INF };
                let best = carry.max(consecutive.saturating_add(CONSECUTIVE_BONUS));
                if best <= NEG_INF / 2 {
                    continue;
                }
                let mut score = best;
                if boundary {
                    score += BOUNDARY_BONUS;
                }
                score
            };

            row[j] = placement + MATCH_BONUS;
        }

        if row.iter().all(|&s| s == NEG_INF) {
            return None;
        }
        rows.push(row);
    }

    let last = &rows[n - 1];
    let (mut j, &best) = last
        .iter()
        .enumerate()
        .max_by_key(|&(j, &s)| (s, std::cmp::Reverse(j)))?;
    if best < QUALITY_THRESHOLD_PER_CHAR * n as i32 {
        return None;
    }

    // Traceback: for each row pick the predecessor that reproduces the score
    let mut positions = vec![0usize; n];
    positions[n - 1] = j;
    for i in (1..n).rev() {
        let row = &rows[i - 1];
        let boundary_bonus = if line_chars[j].3 { BOUNDARY_BONUS } else { 0 };
        let needed = rows[i][j] - MATCH_BONUS - boundary_bonus;

        // consecutive predecessor first - it is the preferred alignment
        let mut chosen = None;
        if j > 0 && row[j - 1].saturating_add(CONSECUTIVE_BONUS) == needed {
            chosen = Some(j - 1);
        } else {
            for k in (0..j.saturating_sub(1)).rev() {
                let gap = (j - k - 1) as i32;
                if row[k].saturating_sub(GAP_OPEN + (gap - 1).max(0) * GAP_EXTEND) == needed {
                    chosen = Some(k);
                    break;
                }
            }
        }

        j = chosen.unwrap_or_else(|| {
            // numeric edge: fall back to the best-scoring predecessor
            row[..j]
                .iter()
                .enumerate()
                .max_by_key(|&(_, &s)| s)
                .map(|(k, _)| k)
                .unwrap_or(0)
        });
        positions[i - 1] = j;
    }

    let ranges = merge_positions(&positions, &line_chars);
    Some(LineMatch {
        score: best.clamp(0, u16::MAX as i32) as u16,
        ranges,
        exact: false,
    })
}

fn find_exact(needle: &str, line: &str, case_sensitive: bool) -> Option<(u32, u32)> {
    if case_sensitive {
        let start = line.find(needle)?;
        return Some((start as u32, (start + needle.len()) as u32));
    }

    // Case folding can change byte lengths; fold per char and track offsets.
    let folded_needle: String = needle.chars().map(|c| fold_char(c, false)).collect();
    let folded_line: String = line.chars().map(|c| fold_char(c, false)).collect();
    let folded_start = folded_line.find(&folded_needle)?;

    let mut folded_offset = 0usize;
    let mut start = None;
    let mut end = line.len();
    for (offset, c) in line.char_indices() {
        if folded_offset >= folded_start && start.is_none() {
            start = Some(offset);
        }
        folded_offset += fold_char(c, false).len_utf8();
        if folded_offset >= folded_start + folded_needle.len() {
            end = offset + c.len_utf8();
            break;
        }
    }

    start.map(|s| (s as u32, end as u32))
}

#[inline]
fn fold_char(c: char, case_sensitive: bool) -> char {
    if case_sensitive {
        c
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

fn merge_positions(positions: &[usize], line_chars: &[(u32, u8, char, bool)]) -> Vec<(u32, u32)> {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &pos in positions {
        let (offset, len, _, _) = line_chars[pos];
        let end = offset + len as u32;
        match ranges.last_mut() {
            Some((_, last_end)) if *last_end == offset => *last_end = end,
            _ => ranges.push((offset, end)),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_substring_wins() {
        let m = score_line("hello", "say hello world", false).unwrap();
        assert!(m.exact);
        assert_eq!(m.ranges, vec![(4, 9)]);
    }

    #[test]
    fn case_sensitivity_is_honoured() {
        assert!(score_line("Hello", "say hello", true).is_none());
        assert!(score_line("hello", "say HELLO", false).is_some());
    }

    #[test]
    fn subsequence_with_gap_matches() {
        let m = score_line("mxl", "mutex_lock", false).expect("should align m..x..l");
        assert!(!m.exact);
        assert_eq!(m.ranges.len(), 3);
        assert_eq!(m.ranges[0], (0, 1)); // 'm'
    }

    #[test]
    fn missing_characters_mean_no_match() {
        assert!(score_line("xyz", "abcdef", false).is_none());
        assert!(score_line("abc", "cba", false).is_none());
    }

    #[test]
    fn scattered_garbage_is_filtered() {
        // every needle char occurs, but spread across unrelated words
        assert!(score_line("abcdef", "a1b2c3d4e5f6 padding padding", false).is_none());
    }

    #[test]
    fn contiguous_beats_scattered() {
        let contiguous = score_line("abc", "abc_handler", false).unwrap();
        let scattered = score_line("abc", "a_b_c_handler", false).unwrap();
        assert!(contiguous.score > scattered.score);
    }

    #[test]
    fn unicode_offsets_are_byte_accurate() {
        let m = score_line("guli", "régulière", false).unwrap();
        // 'g' sits after the 2-byte 'é'
        assert_eq!(m.ranges[0].0, 3);
        let (start, end) = m.ranges[0];
        assert_eq!(&"régulière"[start as usize..end as usize], "guli");
    }

    #[test]
    fn contiguous_run_outscores_boundary_hops() {
        let contiguous = score_line("milk", "milky way", false).unwrap();
        let hops = score_line("milk", "m_i_l_k", false).unwrap();
        assert!(contiguous.score > hops.score);
    }
}
