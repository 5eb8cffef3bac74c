use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BashCategory {
    VersionControl,
    Testing,
    Build,
    Lint,
    PackageManagement,
    FileOps,
    Other,
}

impl BashCategory {
    pub fn label(&self) -> &'static str {
        match self {
            BashCategory::VersionControl => "version-control",
            BashCategory::Testing => "testing",
            BashCategory::Build => "build",
            BashCategory::Lint => "lint",
            BashCategory::PackageManagement => "package-management",
            BashCategory::FileOps => "file-ops",
            BashCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for BashCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

struct BashRule {
    category: BashCategory,
    pattern: Regex,
}

/// Ordered rule table; the first match wins, `Other` is the fallthrough.
static BASH_RULES: LazyLock<Vec<BashRule>> = LazyLock::new(|| {
    [
        (BashCategory::VersionControl, r"^(git|gh)\b"),
        (
            BashCategory::Testing,
            r"^(pytest|vitest|jest|mocha|rspec|phpunit|tox|cargo (test|nextest)|go test|(npm|pnpm|yarn|bun) (run )?test|python3? -m (pytest|unittest))\b",
        ),
        (
            BashCategory::Build,
            r"^(cargo (build|check)|go build|tsc|webpack|vite build|next build|(npm|pnpm|yarn|bun) run build|make|cmake|gradle|mvn|docker build)\b",
        ),
        (
            BashCategory::Lint,
            r"^(eslint|prettier|biome|rubocop|flake8|ruff|black|mypy|golangci-lint|gofmt|cargo (fmt|clippy)|go vet|(npm|pnpm|yarn|bun) run lint)\b",
        ),
        (
            BashCategory::PackageManagement,
            r"^(npm|pnpm|yarn|bun|pip3?|uv|poetry|cargo|brew|apt|apt-get|go|gem|bundle) (install|i|ci|add|remove|rm|uninstall|update|upgrade|sync|get|mod)\b",
        ),
        (
            BashCategory::FileOps,
            r"^(ls|cat|head|tail|mkdir|rm|rmdir|cp|mv|touch|chmod|chown|find|grep|rg|wc|sed|awk|tree|ln|stat|du|diff)\b",
        ),
    ]
    .into_iter()
    .filter_map(|(category, pattern)| {
        Regex::new(pattern).ok().map(|pattern| BashRule { category, pattern })
    })
    .collect()
});

/// Programs whose first argument is a subcommand worth keeping.
const SUBCOMMAND_PROGRAMS: &[&str] = &[
    "git", "gh", "cargo", "npm", "pnpm", "yarn", "bun", "go", "docker", "kubectl", "pip", "pip3",
    "uv", "poetry", "brew", "apt", "apt-get", "make", "gem", "bundle",
];

/// Script runners whose `run <script>` keeps the script name.
const SCRIPT_RUNNERS: &[&str] = &["npm", "pnpm", "yarn", "bun"];

/// Wrappers stripped before the real program.
const COMMAND_WRAPPERS: &[&str] = &["sudo", "time", "nohup", "env", "npx", "bunx"];

/// A classified and normalized shell invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BashPattern {
    pub category: BashCategory,
    pub normalized: String,
}

impl BashPattern {
    /// `<category>:<normalized>` key used for counting.
    pub fn key(&self) -> String {
        format!("{}:{}", self.category.label(), self.normalized)
    }
}

/// Pick the first meaningful segment of a chained command (`cd x && ...`
/// prefixes are skipped) and tokenize it with wrappers and env assignments removed.
fn primary_tokens(command: &str) -> Vec<String> {
    let segments = command
        .split(['\n', ';', '|', '&'])
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut fallback = Vec::new();
    for segment in segments {
        let tokens: Vec<String> = segment
            .split_whitespace()
            .skip_while(|t| is_env_assignment(t) || COMMAND_WRAPPERS.contains(t))
            .map(|t| t.to_string())
            .collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] == "cd" || tokens[0] == "source" || tokens[0] == "export" {
            if fallback.is_empty() {
                fallback = tokens;
            }
            continue;
        }
        return tokens;
    }
    fallback
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        None => false,
    }
}

fn program_name(token: &str) -> String {
    token.rsplit('/').next().unwrap_or(token).to_lowercase()
}

/// Collapse an invocation to `program [subcommand [script]]` so that runs
/// differing only in paths, flags or messages share one form.
pub fn normalize_command(command: &str) -> String {
    let tokens = primary_tokens(command);
    let Some(first) = tokens.first() else {
        return String::new();
    };

    let program = program_name(first);
    let mut parts = vec![program.clone()];

    if matches!(program.as_str(), "python" | "python3")
        && tokens.get(1).map(String::as_str) == Some("-m")
    {
        if let Some(module) = tokens.get(2) {
            parts.push("-m".to_string());
            parts.push(module.to_lowercase());
        }
        return parts.join(" ");
    }

    if SUBCOMMAND_PROGRAMS.contains(&program.as_str()) {
        if let Some(sub) = tokens.get(1).filter(|t| !t.starts_with('-')) {
            parts.push(sub.to_lowercase());
            if SCRIPT_RUNNERS.contains(&program.as_str()) && sub == "run" {
                if let Some(script) = tokens.get(2).filter(|t| !t.starts_with('-')) {
                    parts.push(script.to_lowercase());
                }
            }
        }
    }

    parts.join(" ")
}

/// Classify a command against the ordered rule table.
pub fn classify_command(command: &str) -> BashPattern {
    let tokens = primary_tokens(command);
    let mut line = tokens.join(" ");
    if let Some(first) = tokens.first() {
        let program = program_name(first);
        line = match line.split_once(' ') {
            Some((_, rest)) => format!("{program} {rest}"),
            None => program,
        };
    }

    let category = BASH_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(&line))
        .map(|rule| rule.category)
        .unwrap_or(BashCategory::Other);

    BashPattern {
        category,
        normalized: normalize_command(command),
    }
}

/// Count classified patterns over a set of commands. Blank commands are ignored.
pub fn extract_bash_patterns<'a, I>(commands: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = HashMap::new();
    for command in commands {
        let pattern = classify_command(command);
        if pattern.normalized.is_empty() {
            continue;
        }
        *counts.entry(pattern.key()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(cmd: &str) -> BashCategory {
        classify_command(cmd).category
    }

    #[test]
    fn classifies_common_commands() {
        assert_eq!(category("git status"), BashCategory::VersionControl);
        assert_eq!(category("gh pr create --fill"), BashCategory::VersionControl);
        assert_eq!(category("cargo test --all"), BashCategory::Testing);
        assert_eq!(category("npm run test -- --watch"), BashCategory::Testing);
        assert_eq!(category("python -m pytest tests/"), BashCategory::Testing);
        assert_eq!(category("cargo build --release"), BashCategory::Build);
        assert_eq!(category("npm run build"), BashCategory::Build);
        assert_eq!(category("npx eslint src"), BashCategory::Lint);
        assert_eq!(category("npm install lodash"), BashCategory::PackageManagement);
        assert_eq!(category("pip install -r requirements.txt"), BashCategory::PackageManagement);
        assert_eq!(category("ls -la src"), BashCategory::FileOps);
        assert_eq!(category("curl https://example.com"), BashCategory::Other);
    }

    #[test]
    fn first_matching_rule_wins() {
        // A commit message mentioning "make" stays version control
        assert_eq!(category("git commit -m 'make tests pass'"), BashCategory::VersionControl);
    }

    #[test]
    fn tool_names_in_arguments_do_not_classify() {
        assert_eq!(category("rm -rf make"), BashCategory::FileOps);
        assert_eq!(category("grep tsc src"), BashCategory::FileOps);
        assert_eq!(category("cat pytest.ini"), BashCategory::FileOps);
        assert_eq!(category("echo cargo test"), BashCategory::Other);
        assert_eq!(category("cargo clippy --all-targets"), BashCategory::Lint);
        assert_eq!(category("pnpm run lint"), BashCategory::Lint);
        assert_eq!(category("make build"), BashCategory::Build);
    }

    #[test]
    fn cd_prefix_is_skipped() {
        let p = classify_command("cd /repo/app && cargo test -p core");
        assert_eq!(p.category, BashCategory::Testing);
        assert_eq!(p.normalized, "cargo test");
    }

    #[test]
    fn normalization_collapses_arguments() {
        assert_eq!(normalize_command("git   commit -m \"one\""), "git commit");
        assert_eq!(normalize_command("git commit -am 'two'"), "git commit");
        assert_eq!(normalize_command("/usr/bin/git log --oneline"), "git log");
        assert_eq!(normalize_command("RUST_LOG=debug cargo run --bin x"), "cargo run");
        assert_eq!(normalize_command("npm run lint:fix"), "npm run lint:fix");
        assert_eq!(normalize_command("ls -la /tmp"), "ls");
        assert_eq!(normalize_command("   "), "");
    }

    #[test]
    fn identical_invocations_share_a_key() {
        let counts = extract_bash_patterns([
            "git status",
            "git  status --short",
            "cd repo && git status",
            "cargo test",
            "",
        ]);
        assert_eq!(counts.get("version-control:git status"), Some(&3));
        assert_eq!(counts.get("testing:cargo test"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
