//! The testie record and its loader

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use testie_subst::NodeResolver;
use testie_types::Row;
use tracing::debug;

use crate::config::ConfigRegistry;
use crate::error::{GrammarError, Result, TestieError};
use crate::expansion::ExpandMode;
use crate::late::LateVariableSection;
use crate::section::{FileSection, ImportSection, RequireSection, ScriptSection, Section, SectionFactory};
use crate::tags::Tags;
use crate::variable::VariableContainer;

static DEFAULT_CONFIG: LazyLock<ConfigRegistry> = LazyLock::new(ConfigRegistry::new);
static NO_VARIABLES: LazyLock<VariableContainer> = LazyLock::new(VariableContainer::new);

/// Script or file text resolved for one row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedText {
    pub name: String,
    pub role: Option<String>,
    pub content: String,
}

/// A parsed test description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Testie {
    pub name: String,
    /// Tags active for this run
    pub tags: Tags,
    pub info: Option<String>,
    pub pyexit: Option<String>,
    pub config: Option<ConfigRegistry>,
    pub variables: Option<VariableContainer>,
    /// Applied in file order, each seeing the previous one's output
    pub late_variables: Vec<LateVariableSection>,
    pub scripts: Vec<ScriptSection>,
    pub imports: Vec<ImportSection>,
    pub files: Vec<FileSection>,
    pub init_files: Vec<FileSection>,
    pub requirements: Vec<RequireSection>,
}

impl Testie {
    /// An empty testie, before any section is attached
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
            ..Default::default()
        }
    }

    /// Parse testie text.
    ///
    /// Lines starting with `%` open a section; every other line belongs to
    /// the section above it. Errors carry the 1-based line they occurred on.
    pub fn parse(name: impl Into<String>, text: &str, tags: Tags) -> Result<Testie> {
        let mut testie = Testie::new(name, tags);
        let mut factory = SectionFactory::new();
        let mut current: Option<(usize, Section)> = None;

        for (i, line) in text.lines().enumerate() {
            let lineno = i + 1;
            if let Some(header) = line.strip_prefix('%') {
                if let Some((start, section)) = current.take() {
                    finish_at(section, &mut testie, start)?;
                }
                let section = factory
                    .build(&testie, header)
                    .map_err(|e| e.at_line(lineno))?;
                current = Some((lineno, section));
            } else if let Some((_, section)) = current.as_mut() {
                section.append_line(line);
            } else if !line.trim().is_empty() {
                let err: TestieError =
                    GrammarError::ContentBeforeSection(line.trim().to_string()).into();
                return Err(err.at_line(lineno));
            }
        }
        if let Some((start, section)) = current.take() {
            finish_at(section, &mut testie, start)?;
        }

        testie.variables.get_or_insert_with(VariableContainer::new);
        testie.config.get_or_insert_with(ConfigRegistry::new);
        debug!(
            testie = %testie.name,
            scripts = testie.scripts.len(),
            matrix = testie.variables().matrix_size(),
            "parsed testie"
        );
        Ok(testie)
    }

    pub(crate) fn has_singleton(&self, name: &str) -> bool {
        match name {
            "info" => self.info.is_some(),
            "pyexit" => self.pyexit.is_some(),
            "config" => self.config.is_some(),
            "variables" => self.variables.is_some(),
            _ => false,
        }
    }

    pub fn config(&self) -> &ConfigRegistry {
        self.config.as_ref().unwrap_or(&DEFAULT_CONFIG)
    }

    pub fn variables(&self) -> &VariableContainer {
        self.variables.as_ref().unwrap_or(&NO_VARIABLES)
    }

    /// Entries of `require_tags` not active for this run
    pub fn missing_required_tags(&self) -> Vec<String> {
        self.config()
            .get_list("require_tags")
            .iter()
            .map(|t| t.to_string())
            .filter(|t| !self.tags.contains(t))
            .collect()
    }

    /// The configured title, else the testie name
    pub fn title(&self) -> String {
        self.config()
            .get_str("title")
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn role_map(&self) -> BTreeMap<String, String> {
        self.config().role_map()
    }

    /// Raw matrix rows, before late variables
    pub fn expand(&self, mode: ExpandMode) -> Vec<Row> {
        self.variables().expand(mode)
    }

    /// Apply every late variable section to one row
    pub fn finalize_row(&self, row: &Row) -> Result<Row> {
        self.late_variables
            .iter()
            .try_fold(row.clone(), |row, late| late.derive(&row, &self.tags))
    }

    /// Matrix rows with late variables applied
    pub fn rows(&self, mode: ExpandMode) -> Result<Vec<Row>> {
        self.expand(mode)
            .iter()
            .map(|row| self.finalize_row(row))
            .collect()
    }

    /// Override variables with `name=value` lines
    pub fn override_variables<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<()> {
        let tags = &self.tags;
        self.variables
            .get_or_insert_with(VariableContainer::new)
            .override_all(lines, tags)
    }

    /// Override config options with `name=value` lines
    pub fn override_config<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<()> {
        let tags = &self.tags;
        self.config
            .get_or_insert_with(ConfigRegistry::new)
            .override_all(lines, tags)
    }

    /// Every script and init script resolved for `row`
    pub fn resolve_scripts(
        &self,
        row: &Row,
        nodes: Option<&dyn NodeResolver>,
    ) -> Result<Vec<ResolvedText>> {
        let role_map = self.role_map();
        self.scripts
            .iter()
            .map(|script| -> Result<ResolvedText> {
                Ok(ResolvedText {
                    name: script.display_name(true),
                    role: script.role.clone(),
                    content: script.resolve(row, nodes, &role_map)?,
                })
            })
            .collect()
    }

    /// Every file and init file resolved for `row`
    pub fn resolve_files(
        &self,
        row: &Row,
        nodes: Option<&dyn NodeResolver>,
    ) -> Result<Vec<ResolvedText>> {
        let role_map = self.role_map();
        self.init_files
            .iter()
            .chain(&self.files)
            .map(|file| -> Result<ResolvedText> {
                Ok(ResolvedText {
                    name: file.filename.clone(),
                    role: file.role.clone(),
                    content: file.resolve(row, nodes, &role_map)?,
                })
            })
            .collect()
    }
}

fn finish_at(section: Section, testie: &mut Testie, line: usize) -> Result<()> {
    // Body errors are relative to the header; shift them to file lines
    section.finish(testie).map_err(|e| match e {
        TestieError::AtLine { line: offset, source } => TestieError::AtLine {
            line: line + offset,
            source,
        },
        other => other.at_line(line),
    })
}
