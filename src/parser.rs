// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! SFZ file tokenization.
//!
//! Parsing happens in two passes. A line-level preprocessing pass strips `//`
//! comments, resolves `#include` directives (relative to the instrument root,
//! with an already-included set breaking cycles) and performs longest-match
//! `$NAME` substitution for `#define`. The joined text then goes through the
//! pest grammar, which produces a stream of header and opcode tokens.

pub mod grammar;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pest::Parser;
use regex::Regex;
use tracing::{debug, warn};

use grammar::{Rule, SfzTokenizer};

/// A single `name=value` opcode. Names carrying a trailing integer parameter
/// (`locc32`, `amp_velcurve_6`, `ampeg_attack_oncc1`) are split so the region
/// can match on the base name.
#[derive(Debug, Clone, PartialEq)]
pub struct Opcode {
    pub name: String,
    pub parameter: Option<u32>,
    pub value: String,
}

impl Opcode {
    pub fn new(raw_name: &str, value: &str) -> Self {
        let base = raw_name.trim_end_matches(|c: char| c.is_ascii_digit());
        let digits = &raw_name[base.len()..];
        let (name, parameter) = match digits.parse::<u32>() {
            Ok(parameter) if !base.is_empty() => (base.to_string(), Some(parameter)),
            _ => (raw_name.to_string(), None),
        };
        Self {
            name,
            parameter,
            value: value.to_string(),
        }
    }

    /// The opcode name as written in the file, parameter included.
    pub fn full_name(&self) -> String {
        match self.parameter {
            Some(parameter) => format!("{}{}", self.name, parameter),
            None => self.name.clone(),
        }
    }
}

/// A token produced by the tokenizer, in file order.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Header(String),
    Opcode(Opcode),
}

/// Error type for SFZ file parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid SFZ syntax: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),
}

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^#include\s+"([^"]*)""#).expect("invalid include regex"))
}

fn define_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#define\s+(\$[A-Za-z0-9_]+)\s+(\S+)").expect("invalid define regex")
    })
}

/// Reads an SFZ file and its includes into a token stream.
#[derive(Debug)]
pub struct SfzParser {
    root_directory: PathBuf,
    defines: Vec<(String, String)>,
    included_files: Vec<PathBuf>,
}

impl SfzParser {
    pub fn new(root_directory: &Path) -> Self {
        Self {
            root_directory: root_directory.to_path_buf(),
            defines: Vec::new(),
            included_files: Vec::new(),
        }
    }

    /// Reads the file, resolves directives and tokenizes the result.
    pub fn parse_file(&mut self, path: &Path) -> Result<Vec<Token>, ParseError> {
        let mut lines = Vec::new();
        self.included_files.push(path.to_path_buf());
        self.read_sfz_file(path, &mut lines)
            .map_err(|source| ParseError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let text = lines.join(" ");
        Self::tokenize(&text)
    }

    /// Tokenizes preprocessed SFZ text.
    pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
        let pairs = SfzTokenizer::parse(Rule::file, text)
            .map_err(|e| ParseError::Syntax(Box::new(e)))?;

        let mut tokens = Vec::new();
        for file in pairs {
            for item in file.into_inner() {
                match item.as_rule() {
                    Rule::header => {
                        if let Some(name) = item.into_inner().next() {
                            tokens.push(Token::Header(name.as_str().to_string()));
                        }
                    }
                    Rule::opcode => {
                        let mut inner = item.into_inner();
                        if let Some(name) = inner.next() {
                            let value = inner.next().map(|p| p.as_str()).unwrap_or("");
                            tokens.push(Token::Opcode(Opcode::new(name.as_str(), value.trim())));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(tokens)
    }

    fn read_sfz_file(&mut self, path: &Path, lines: &mut Vec<String>) -> std::io::Result<()> {
        let content = fs::read_to_string(path)?;
        for raw_line in content.lines() {
            let mut line = raw_line;
            if let Some(position) = line.find("//") {
                line = &line[..position];
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(captures) = include_regex().captures(line) {
                let include_path = captures[1].replace('\\', "/");
                let new_file = self.root_directory.join(include_path);
                if self.included_files.contains(&new_file) {
                    continue;
                }
                if !new_file.exists() {
                    debug!(path = ?new_file, "Skipping missing include");
                    continue;
                }
                self.included_files.push(new_file.clone());
                if let Err(e) = self.read_sfz_file(&new_file, lines) {
                    warn!(path = ?new_file, error = %e, "Failed to read included file");
                }
                continue;
            }

            if let Some(captures) = define_regex().captures(line) {
                let name = captures[1].to_string();
                let value = captures[2].to_string();
                self.defines.retain(|(existing, _)| existing != &name);
                self.defines.push((name, value));
                continue;
            }

            lines.push(self.substitute_defines(line));
        }
        Ok(())
    }

    /// Replaces `$NAME` occurrences with their defined values, preferring the
    /// longest matching name at each position.
    fn substitute_defines(&self, line: &str) -> String {
        if self.defines.is_empty() || !line.contains('$') {
            return line.to_string();
        }

        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        while let Some(position) = rest.find('$') {
            out.push_str(&rest[..position]);
            let candidate = &rest[position..];
            let matched = self
                .defines
                .iter()
                .filter(|(name, _)| candidate.starts_with(name.as_str()))
                .max_by_key(|(name, _)| name.len());
            match matched {
                Some((name, value)) => {
                    out.push_str(value);
                    rest = &candidate[name.len()..];
                }
                None => {
                    out.push('$');
                    rest = &candidate[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}
