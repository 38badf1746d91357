use crate::codegen::DRAWING_GLOBALS;
use crate::error::{BlocksError, BlocksResult};
use crate::lexer::{is_ident_part, is_ident_start};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: &str, replacement: &str) -> BlocksResult<Self> {
        let rule = Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> BlocksResult<()> {
        if identifier_re().is_match(&self.pattern) {
            Ok(())
        } else {
            Err(BlocksError::rule(format!(
                "pattern '{}' is not an identifier",
                self.pattern
            )))
        }
    }
}

/// Ordered rewrite rules. Order matters: each rule runs over the output of the one before.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleTable {
    rules: Vec<RewriteRule>,
}

impl RuleTable {
    /// Binds every drawing global to a member of `binding`.
    pub fn bind_to(binding: &str) -> BlocksResult<Self> {
        if !identifier_re().is_match(binding) {
            return Err(BlocksError::rule(format!(
                "binding name '{}' is not an identifier",
                binding
            )));
        }
        Ok(Self::bound(binding))
    }

    pub fn p5() -> Self {
        Self::bound("p5")
    }

    fn bound(binding: &str) -> Self {
        let rules = DRAWING_GLOBALS
            .iter()
            .map(|name| RewriteRule {
                pattern: name.to_string(),
                replacement: format!("{}.{}", binding, name),
            })
            .collect();
        Self { rules }
    }

    /// Reads a JSON array of `{"pattern": .., "replacement": ..}` objects.
    pub fn from_json(text: &str) -> BlocksResult<Self> {
        let rules: Vec<RewriteRule> = serde_json::from_str(text)
            .map_err(|e| BlocksError::rule(format!("invalid rule table: {}", e)))?;
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    pub fn push(&mut self, rule: RewriteRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, source: &str) -> String {
        rewrite(source, &self.rules)
    }
}

/// Applies `rules` in order. A rule replaces whole identifier tokens only; string literals,
/// comments and member names after `.` are left alone. Text produced by an earlier rule is
/// input to the later ones, member names included.
#[tracing::instrument(skip_all, fields(rules = rules.len(), bytes = source.len()))]
pub fn rewrite(source: &str, rules: &[RewriteRule]) -> String {
    let mut text = Marked::original(source);
    for rule in rules {
        let (next, hits) = apply_rule(&text, rule);
        if hits > 0 {
            tracing::trace!(pattern = %rule.pattern, hits, "rewrote identifiers");
        }
        text = next;
    }
    text.chars.into_iter().collect()
}

/// Source text plus, per char, whether an earlier rule produced it.
struct Marked {
    chars: Vec<char>,
    produced: Vec<bool>,
}

impl Marked {
    fn original(source: &str) -> Self {
        let chars = source.chars().collect::<Vec<_>>();
        let produced = vec![false; chars.len()];
        Self { chars, produced }
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            chars: Vec::with_capacity(n),
            produced: Vec::with_capacity(n),
        }
    }

    fn copy_from(&mut self, other: &Marked, start: usize, end: usize) {
        self.chars.extend_from_slice(&other.chars[start..end]);
        self.produced.extend_from_slice(&other.produced[start..end]);
    }

    fn push_replacement(&mut self, text: &str) {
        for ch in text.chars() {
            self.chars.push(ch);
            self.produced.push(true);
        }
    }
}

fn apply_rule(source: &Marked, rule: &RewriteRule) -> (Marked, usize) {
    let chars = &source.chars;
    let mut out = Marked::with_capacity(chars.len());
    let mut hits = 0usize;
    let mut last_significant = '\0';
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '"' || ch == '\'' || ch == '`' {
            let end = skip_string(chars, i);
            out.copy_from(source, i, end);
            last_significant = ch;
            i = end;
            continue;
        }
        if ch == '/' && chars.get(i + 1) == Some(&'/') {
            let end = chars[i..]
                .iter()
                .position(|c| *c == '\n')
                .map_or(chars.len(), |p| i + p);
            out.copy_from(source, i, end);
            i = end;
            continue;
        }
        if ch == '/' && chars.get(i + 1) == Some(&'*') {
            let end = skip_block_comment(chars, i);
            out.copy_from(source, i, end);
            i = end;
            continue;
        }
        if ch.is_ascii_digit() {
            let end = skip_while(chars, i, |c| is_ident_part(c) || c == '.');
            out.copy_from(source, i, end);
            last_significant = ch;
            i = end;
            continue;
        }
        if is_ident_start(ch) {
            let end = skip_while(chars, i, is_ident_part);
            // Member names written in the source stay put; ones a rule produced do not.
            let member = last_significant == '.' && !source.produced[i];
            let word = chars[i..end].iter().collect::<String>();
            if !member && word.eq_ignore_ascii_case(&rule.pattern) {
                out.push_replacement(&rule.replacement);
                hits += 1;
            } else {
                out.copy_from(source, i, end);
            }
            last_significant = ch;
            i = end;
            continue;
        }

        out.copy_from(source, i, i + 1);
        if !ch.is_whitespace() {
            last_significant = ch;
        }
        i += 1;
    }
    (out, hits)
}

fn skip_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            '\n' if quote != '`' => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, replacement: &str) -> RewriteRule {
        RewriteRule::new(pattern, replacement).unwrap()
    }

    #[test]
    fn binds_canvas_call() {
        assert_eq!(
            RuleTable::p5().apply("createCanvas(200, 200);\n"),
            "p5.createCanvas(200, 200);\n"
        );
    }

    #[test]
    fn never_matches_inside_longer_identifier() {
        let rules = [rule("create", "p5.create")];
        assert_eq!(
            rewrite("createCanvas(1, 2); create();", &rules),
            "createCanvas(1, 2); p5.create();"
        );
    }

    #[test]
    fn unmatched_identifiers_pass_through() {
        let source = "var total = count + 1;\n";
        assert_eq!(RuleTable::p5().apply(source), source);
    }

    #[test]
    fn strings_comments_and_members_are_untouched() {
        let source = "text('fill the rect', 5, 5); // rect\n/* fill */ obj.rect = 1;";
        assert_eq!(
            RuleTable::p5().apply(source),
            "p5.text('fill the rect', 5, 5); // rect\n/* fill */ obj.rect = 1;"
        );
    }

    #[test]
    fn matching_ignores_case() {
        let rules = [rule("mousex", "p5.mouseX")];
        assert_eq!(rewrite("MouseX + mouseX", &rules), "p5.mouseX + p5.mouseX");
    }

    #[test]
    fn later_rules_see_earlier_replacements() {
        let rules = [rule("a", "b"), rule("b", "c")];
        assert_eq!(rewrite("a + b", &rules), "c + c");

        let growing = [rule("x", "x + x")];
        assert_eq!(rewrite("x", &growing), "x + x");
    }

    #[test]
    fn produced_member_names_feed_later_rules() {
        let rules = [rule("a", "p5.b"), rule("b", "c")];
        assert_eq!(rewrite("a", &rules), "p5.c");

        // A member name already in the source is still left alone.
        assert_eq!(rewrite("a + obj.b", &rules), "p5.c + obj.b");
    }

    #[test]
    fn numbers_are_not_identifiers() {
        let rules = [rule("e2", "oops")];
        assert_eq!(rewrite("1e2 + e2", &rules), "1e2 + oops");
    }

    #[test]
    fn custom_binding_and_json_tables() {
        let table = RuleTable::bind_to("sketch").unwrap();
        assert_eq!(table.apply("draw = 1;"), "sketch.draw = 1;");
        assert!(RuleTable::bind_to("not valid").is_err());

        let table =
            RuleTable::from_json(r#"[{"pattern": "rect", "replacement": "g.rect"}]"#).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.apply("rect(1, 2, 3, 4);"), "g.rect(1, 2, 3, 4);");

        assert!(RuleTable::from_json(r#"[{"pattern": "a-b", "replacement": "x"}]"#).is_err());
    }
}
