//! Repository identity normalization and pipeline candidate scoring.

/// Score for a candidate whose repository is exactly `org/repo`.
pub const EXACT_MATCH_SCORE: u32 = 1000;

/// Converts a git remote URL into a lowercase `host/org/repo` string.
///
/// Strips at most one trailing `.git` and one trailing `/`, and only the
/// first `:` of a `git@host:path` remote is rewritten.
pub fn normalize_repo(url: &str) -> String {
    let mut repo = url.trim().to_lowercase();

    if let Some(stripped) = repo.strip_suffix(".git") {
        repo = stripped.to_string();
    }
    if let Some(stripped) = repo.strip_suffix('/') {
        repo = stripped.to_string();
    }
    if let Some(rest) = repo.strip_prefix("git@") {
        repo = rest.replacen(':', "/", 1);
    }
    for scheme in ["https://", "http://", "ssh://"] {
        if let Some(rest) = repo.strip_prefix(scheme) {
            repo = rest.to_string();
        }
    }

    repo
}

/// Scores how likely `candidate_url` is the repository backing `org/slug`.
///
/// Zero means no match.
pub fn score_candidate(org: &str, slug: &str, candidate_url: &str) -> u32 {
    let candidate = normalize_repo(candidate_url);
    let user_repo = format!("{org}/{slug}");
    let user_repo = user_repo.strip_suffix('/').unwrap_or(&user_repo);

    if candidate == user_repo || candidate.ends_with(&format!("/{user_repo}")) {
        return EXACT_MATCH_SCORE;
    }
    if user_repo.ends_with(&format!("/{candidate}")) {
        return same_repo_score(user_repo, &candidate);
    }

    partial_name_score(org, slug, &candidate)
}

/// Composite score for a candidate that names the same repository less
/// precisely than an exact `org/repo` match.
fn same_repo_score(user_repo: &str, candidate: &str) -> u32 {
    let suffix_score = 5 * longest_common_suffix(user_repo, candidate);

    let segment_score = if user_repo.matches('/').count() == candidate.matches('/').count() {
        50
    } else {
        0
    };

    let max_len = user_repo.chars().count().max(candidate.chars().count());
    let distance_score = if max_len == 0 {
        100
    } else {
        let distance = strsim::levenshtein(user_repo, candidate);
        100_usize.saturating_sub(100 * distance / max_len)
    };

    u32::try_from(suffix_score + segment_score + distance_score).unwrap_or(u32::MAX)
}

/// Handles pipelines whose repository name embeds the target name, such as
/// `org-reponame` or `reponame-legacy`.
fn partial_name_score(org: &str, slug: &str, candidate: &str) -> u32 {
    let repo_name = slug.to_lowercase();
    if repo_name.is_empty() {
        return 0;
    }

    let mut segments = candidate.rsplit('/');
    let last = segments.next().unwrap_or_default();
    if !last.contains(&repo_name) {
        return 0;
    }

    let mut score = 500;
    if last.ends_with(&repo_name) {
        score += 200;
    }

    let extra = last.chars().count() - repo_name.chars().count();
    if extra <= 10 {
        score += 100 - 10 * u32::try_from(extra).unwrap_or(10);
    }

    if let Some(owner) = segments.next() {
        let org = org.to_lowercase();
        if owner.eq_ignore_ascii_case(&org) {
            score += 100;
        } else if !org.is_empty() && !owner.is_empty() && (owner.contains(&org) || org.contains(owner)) {
            score += 50;
        }
    }

    score
}

/// Number of trailing characters `a` and `b` have in common.
pub fn longest_common_suffix(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .count()
}
