// Line-wise three-way merge. Two pairwise diffs against the ancestor are
// aligned on lines the ancestor shares with both sides; the gaps between
// sync points classify as one-sided edits, agreeing edits, or conflicts.

/// One region of merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    /// Lines both sides agree on.
    Stable(Vec<String>),
    /// Both sides changed the same ancestor span differently.
    Conflict {
        base: Vec<String>,
        current: Vec<String>,
        incoming: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff3Result {
    pub regions: Vec<Region>,
}

impl Diff3Result {
    pub fn has_conflicts(&self) -> bool {
        self.regions
            .iter()
            .any(|r| matches!(r, Region::Conflict { .. }))
    }

    pub fn conflict_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| matches!(r, Region::Conflict { .. }))
            .count()
    }
}

/// Matched line pairs `(base_idx, side_idx)` in increasing order.
fn matches(base: &[&str], side: &[&str]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut bi = 0;
    let mut si = 0;
    for step in diff::slice(base, side) {
        match step {
            diff::Result::Both(_, _) => {
                pairs.push((bi, si));
                bi += 1;
                si += 1;
            }
            diff::Result::Left(_) => bi += 1,
            diff::Result::Right(_) => si += 1,
        }
    }
    pairs
}

/// Three-way merge of line slices. Deterministic: identical inputs produce
/// identical regions.
pub fn merge3(base: &[&str], current: &[&str], incoming: &[&str]) -> Diff3Result {
    let match_current = matches(base, current);
    let match_incoming = matches(base, incoming);

    // Sync points: ancestor lines present in both sides. Both match lists are
    // monotone, so a linear intersection by base index keeps all three
    // coordinates monotone.
    let mut sync = Vec::new();
    let mut ci = 0;
    for &(b, inc) in &match_incoming {
        while ci < match_current.len() && match_current[ci].0 < b {
            ci += 1;
        }
        if ci < match_current.len() && match_current[ci].0 == b {
            sync.push((b, match_current[ci].1, inc));
        }
    }

    let mut regions: Vec<Region> = Vec::new();
    let mut stable_run: Vec<String> = Vec::new();
    let (mut b0, mut c0, mut i0) = (0usize, 0usize, 0usize);

    for &(b, c, i) in &sync {
        if b > b0 || c > c0 || i > i0 {
            emit_gap(
                &mut regions,
                &mut stable_run,
                &base[b0..b],
                &current[c0..c],
                &incoming[i0..i],
            );
        }
        stable_run.push(base[b].to_string());
        b0 = b + 1;
        c0 = c + 1;
        i0 = i + 1;
    }

    if b0 < base.len() || c0 < current.len() || i0 < incoming.len() {
        emit_gap(
            &mut regions,
            &mut stable_run,
            &base[b0..],
            &current[c0..],
            &incoming[i0..],
        );
    }
    if !stable_run.is_empty() {
        regions.push(Region::Stable(stable_run));
    }

    Diff3Result { regions }
}

/// Classify one gap between sync points into the running stable output or a
/// conflict region.
fn emit_gap(
    regions: &mut Vec<Region>,
    stable_run: &mut Vec<String>,
    base_gap: &[&str],
    current_gap: &[&str],
    incoming_gap: &[&str],
) {
    if current_gap == base_gap {
        // Only the incoming side changed.
        stable_run.extend(incoming_gap.iter().map(|l| l.to_string()));
    } else if incoming_gap == base_gap || current_gap == incoming_gap {
        stable_run.extend(current_gap.iter().map(|l| l.to_string()));
    } else if base_gap.is_empty() {
        // Two-sided pure insertion: nothing from the ancestor was touched,
        // so keep both, device lines before user lines.
        stable_run.extend(incoming_gap.iter().map(|l| l.to_string()));
        stable_run.extend(current_gap.iter().map(|l| l.to_string()));
    } else {
        if !stable_run.is_empty() {
            regions.push(Region::Stable(std::mem::take(stable_run)));
        }
        regions.push(Region::Conflict {
            base: base_gap.iter().map(|l| l.to_string()).collect(),
            current: current_gap.iter().map(|l| l.to_string()).collect(),
            incoming: incoming_gap.iter().map(|l| l.to_string()).collect(),
        });
    }
}

/// Convenience wrapper over whole bodies, splitting on line boundaries.
pub fn merge3_text(base: &str, current: &str, incoming: &str) -> Diff3Result {
    let base_lines: Vec<&str> = lines_of(base);
    let current_lines: Vec<&str> = lines_of(current);
    let incoming_lines: Vec<&str> = lines_of(incoming);
    merge3(&base_lines, &current_lines, &incoming_lines)
}

fn lines_of(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.lines().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stable(result: &Diff3Result) -> Vec<String> {
        result
            .regions
            .iter()
            .flat_map(|r| match r {
                Region::Stable(lines) => lines.clone(),
                Region::Conflict { .. } => vec!["<conflict>".to_string()],
            })
            .collect()
    }

    #[test]
    fn test_identical_inputs_are_stable() {
        let result = merge3_text("a\nb\n", "a\nb\n", "a\nb\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["a", "b"]);
    }

    #[test]
    fn test_only_current_changed() {
        let result = merge3_text("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["a", "B", "c"]);
    }

    #[test]
    fn test_only_incoming_changed() {
        let result = merge3_text("a\nb\nc\n", "a\nb\nc\n", "a\nB\nc\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["a", "B", "c"]);
    }

    #[test]
    fn test_non_overlapping_edits_merge_cleanly() {
        let base = "one\ntwo\nthree\nfour\n";
        let current = "ONE\ntwo\nthree\nfour\n";
        let incoming = "one\ntwo\nthree\nFOUR\n";
        let result = merge3_text(base, current, incoming);
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["ONE", "two", "three", "FOUR"]);
    }

    #[test]
    fn test_agreeing_edits_merge_cleanly() {
        let result = merge3_text("a\nb\n", "a\nX\n", "a\nX\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["a", "X"]);
    }

    #[test]
    fn test_competing_edits_conflict() {
        let result = merge3_text("a\nb\nc\n", "a\nFROM CURRENT\nc\n", "a\nFROM DEVICE\nc\n");
        assert!(result.has_conflicts());
        assert_eq!(result.conflict_count(), 1);
        let conflict = result
            .regions
            .iter()
            .find_map(|r| match r {
                Region::Conflict {
                    base,
                    current,
                    incoming,
                } => Some((base.clone(), current.clone(), incoming.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(conflict.0, vec!["b"]);
        assert_eq!(conflict.1, vec!["FROM CURRENT"]);
        assert_eq!(conflict.2, vec!["FROM DEVICE"]);
    }

    #[test]
    fn test_user_addition_plus_device_append_merges_cleanly() {
        // User appended a paragraph, device appended an annotation. Neither
        // touched ancestor lines, so both survive: device lines first.
        let base = "## Highlights\n\n> first\n";
        let current = "## Highlights\n\n> first\n\nMy thoughts on this chapter.\n";
        let incoming = "## Highlights\n\n> first\n\n> second\n";
        let result = merge3_text(base, current, incoming);
        assert!(!result.has_conflicts());
        assert_eq!(
            stable(&result),
            vec![
                "## Highlights",
                "",
                "> first",
                "",
                "> second",
                "",
                "My thoughts on this chapter."
            ]
        );
    }

    #[test]
    fn test_empty_base_identical_sides_clean() {
        let result = merge3_text("", "same\n", "same\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["same"]);
    }

    #[test]
    fn test_empty_base_diverging_sides_unions() {
        // With a trusted empty ancestor both sides are pure insertions.
        // Untrusted baselines are forced into a conflict by the engine, not
        // by the line merge.
        let result = merge3_text("", "mine\n", "theirs\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["theirs", "mine"]);
    }

    #[test]
    fn test_deletion_on_one_side() {
        let result = merge3_text("a\nb\nc\n", "a\nc\n", "a\nb\nc\n");
        assert!(!result.has_conflicts());
        assert_eq!(stable(&result), vec!["a", "c"]);
    }

    #[test]
    fn test_deterministic() {
        let base = "a\nb\nc\nd\n";
        let current = "a\nx\nc\nd\nextra\n";
        let incoming = "a\nb\ny\nd\n";
        let first = merge3_text(base, current, incoming);
        let second = merge3_text(base, current, incoming);
        assert_eq!(first, second);
    }
}
