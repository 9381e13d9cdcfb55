//! Sections and the section factory
//!
//! The factory turns a header line into an empty [`Section`]; the loader
//! appends body lines to it and finally calls [`Section::finish`], which
//! moves the section into its testie.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use testie_subst::{NodeResolver, Substituter, DEFAULT_ROLE};
use testie_types::Row;
use tracing::debug;

use crate::config::ConfigRegistry;
use crate::error::{GrammarError, Result, TestieError};
use crate::grammar::{parse_header, HeaderKind, Params};
use crate::late::LateVariableSection;
use crate::tags;
use crate::testie::Testie;
use crate::variable::VariableContainer;

/// Looks up the external repositories a script depends on
pub trait RepositoryRegistry {
    type Handle;
    type Error;

    fn repository(&self, name: &str) -> std::result::Result<Self::Handle, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Script,
    Init,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::Script => f.write_str("script"),
            ScriptKind::Init => f.write_str("init"),
        }
    }
}

/// `%script` or `%init`
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSection {
    pub role: Option<String>,
    pub params: Params,
    /// Position among the testie's scripts, from 1
    pub index: usize,
    pub init: bool,
    pub content: String,
}

impl ScriptSection {
    pub fn kind(&self) -> ScriptKind {
        if self.init {
            ScriptKind::Init
        } else {
            ScriptKind::Script
        }
    }

    /// The `name` parameter, else `role [index]` when `full`, else the index
    pub fn display_name(&self, full: bool) -> String {
        match self.params.get("name") {
            Some(name) => name.clone(),
            None if full => format!(
                "{} [{}]",
                self.role.as_deref().unwrap_or(DEFAULT_ROLE),
                self.index
            ),
            None => self.index.to_string(),
        }
    }

    fn param<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.params
            .get(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| TestieError::InvalidParam {
                    name: name.to_string(),
                    value: raw.clone(),
                })
            })
            .transpose()
    }

    /// Seconds to wait before starting, 0 by default
    pub fn delay(&self) -> Result<f64> {
        Ok(self.param::<f64>("delay")?.unwrap_or(0.0))
    }

    /// The `autokill` parameter; init scripts default it to false
    pub fn autokill(&self) -> Result<Option<bool>> {
        match self.params.get("autokill") {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(TestieError::InvalidParam {
                    name: "autokill".to_string(),
                    value: raw.clone(),
                }),
            },
        }
    }

    /// Repository names listed in the `deps` parameter
    pub fn deps(&self) -> BTreeSet<String> {
        self.params
            .get("deps")
            .map(|deps| {
                deps.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn deps_repos<R: RepositoryRegistry>(
        &self,
        registry: &R,
    ) -> std::result::Result<Vec<R::Handle>, R::Error> {
        self.deps()
            .iter()
            .map(|dep| registry.repository(dep))
            .collect()
    }

    /// Body substituted for one row, with `self` references bound to this
    /// script's role
    pub fn resolve(
        &self,
        row: &Row,
        nodes: Option<&dyn NodeResolver>,
        role_map: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut sub = Substituter::new().with_role_map(role_map);
        if let Some(role) = self.role.as_deref() {
            sub = sub.with_self_role(role);
        }
        if let Some(nodes) = nodes {
            sub = sub.with_nodes(nodes);
        }
        Ok(sub.apply(row, &self.content)?)
    }
}

/// `%file` or `%init-file`
#[derive(Debug, Clone, PartialEq)]
pub struct FileSection {
    pub role: Option<String>,
    pub filename: String,
    pub noparse: bool,
    pub init: bool,
    pub content: String,
}

impl FileSection {
    /// File body for one row. `noparse` files are returned verbatim.
    pub fn resolve(
        &self,
        row: &Row,
        nodes: Option<&dyn NodeResolver>,
        role_map: &BTreeMap<String, String>,
    ) -> Result<String> {
        if self.noparse {
            return Ok(self.content.clone());
        }
        let mut sub = Substituter::new().with_role_map(role_map);
        if let Some(role) = self.role.as_deref() {
            sub = sub.with_self_role(role);
        }
        if let Some(nodes) = nodes {
            sub = sub.with_nodes(nodes);
        }
        Ok(sub.apply(row, &self.content)?)
    }
}

/// `%import` or `%include`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSection {
    pub role: Option<String>,
    /// `modules/<name>` for plain modules, the given path otherwise
    pub module: String,
    pub params: Params,
    pub is_include: bool,
    pub content: String,
}

/// `%require`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequireSection {
    pub content: String,
}

impl RequireSection {
    /// Requirements always run on the default node
    pub fn role(&self) -> &'static str {
        DEFAULT_ROLE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// Filtered out by its tag expression; content is discarded
    Null,
    Info(String),
    Pyexit(String),
    Config(String),
    Variables(String),
    LateVariables(String),
    Script(ScriptSection),
    Import(ImportSection),
    File(FileSection),
    Require(RequireSection),
}

impl Section {
    pub fn name(&self) -> &'static str {
        match self {
            Section::Null => "null",
            Section::Info(_) => "info",
            Section::Pyexit(_) => "pyexit",
            Section::Config(_) => "config",
            Section::Variables(_) => "variables",
            Section::LateVariables(_) => "late_variables",
            Section::Script(s) if s.init => "init",
            Section::Script(_) => "script",
            Section::Import(i) if i.is_include => "include",
            Section::Import(_) => "import",
            Section::File(f) if f.init => "init-file",
            Section::File(_) => "file",
            Section::Require(_) => "require",
        }
    }

    fn content_mut(&mut self) -> Option<&mut String> {
        match self {
            Section::Null => None,
            Section::Info(c)
            | Section::Pyexit(c)
            | Section::Config(c)
            | Section::Variables(c)
            | Section::LateVariables(c) => Some(c),
            Section::Script(s) => Some(&mut s.content),
            Section::Import(i) => Some(&mut i.content),
            Section::File(f) => Some(&mut f.content),
            Section::Require(r) => Some(&mut r.content),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Section::Null => "",
            Section::Info(c)
            | Section::Pyexit(c)
            | Section::Config(c)
            | Section::Variables(c)
            | Section::LateVariables(c) => c,
            Section::Script(s) => &s.content,
            Section::Import(i) => &i.content,
            Section::File(f) => &f.content,
            Section::Require(r) => &r.content,
        }
    }

    /// Whether the body is exempt from substitution
    pub fn noparse(&self) -> bool {
        matches!(self, Section::File(f) if f.noparse)
    }

    pub fn append_line(&mut self, line: &str) {
        if let Some(content) = self.content_mut() {
            content.push_str(line);
            content.push('\n');
        }
    }

    /// Attach the finished section to its testie. Variable-bearing sections
    /// are parsed here.
    pub fn finish(self, testie: &mut Testie) -> Result<()> {
        match self {
            Section::Null => {}
            Section::Info(content) => testie.info = Some(content),
            Section::Pyexit(content) => testie.pyexit = Some(content),
            Section::Config(content) => {
                let mut config = ConfigRegistry::new();
                config.build(&content, &testie.tags)?;
                testie.config = Some(config);
            }
            Section::Variables(content) => {
                let mut variables = VariableContainer::new();
                variables.build(&content, &testie.tags)?;
                testie.variables = Some(variables);
            }
            Section::LateVariables(content) => {
                testie.late_variables.push(LateVariableSection::new(content));
            }
            Section::Script(script) => testie.scripts.push(script),
            Section::Import(import) => {
                let extra = import.content.trim();
                if !extra.is_empty() {
                    return Err(GrammarError::ImportWithContent(extra.to_string()).into());
                }
                testie.imports.push(import);
            }
            Section::File(file) if file.init => testie.init_files.push(file),
            Section::File(file) => testie.files.push(file),
            Section::Require(require) => testie.requirements.push(require),
        }
        Ok(())
    }
}

/// Builds sections for one testie. Owns the script counter and remembers
/// which singleton kinds it already issued.
#[derive(Debug, Default)]
pub struct SectionFactory {
    scripts: usize,
    issued: BTreeSet<&'static str>,
}

impl SectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, testie: &Testie, line: &str) -> Result<Section> {
        let header = parse_header(line)?;
        if let Some(expr) = header.tags.as_deref() {
            if !tags::matches(expr, &testie.tags) {
                debug!(header = line, "section filtered out by tags");
                return Ok(Section::Null);
            }
        }

        let kind = header.kind;
        if kind.is_singleton() {
            let name = kind.name();
            if testie.has_singleton(name) || !self.issued.insert(name) {
                return Err(GrammarError::DuplicateSection(name).into());
            }
        }

        let section = match kind {
            HeaderKind::Info => Section::Info(String::new()),
            HeaderKind::Pyexit => Section::Pyexit(String::new()),
            HeaderKind::Config => Section::Config(String::new()),
            HeaderKind::Variables => Section::Variables(String::new()),
            HeaderKind::LateVariables => Section::LateVariables(String::new()),
            HeaderKind::Require => Section::Require(RequireSection::default()),
            HeaderKind::Include { path } => Section::Import(ImportSection {
                role: None,
                module: path,
                params: Params::new(),
                is_include: true,
                content: String::new(),
            }),
            HeaderKind::Import {
                role,
                module,
                mut params,
            } => {
                let module = match module.filter(|m| !m.is_empty()) {
                    Some(module) => format!("modules/{}", module),
                    None => params
                        .remove("testie")
                        .filter(|t| !t.is_empty())
                        .ok_or(GrammarError::MissingImportTarget)?,
                };
                Section::Import(ImportSection {
                    role,
                    module,
                    params,
                    is_include: false,
                    content: String::new(),
                })
            }
            HeaderKind::File {
                role,
                name,
                noparse,
                init,
            } => Section::File(FileSection {
                role,
                filename: name,
                noparse,
                init,
                content: String::new(),
            }),
            HeaderKind::Script {
                role,
                mut params,
                init,
            } => {
                if init {
                    params
                        .entry("autokill".to_string())
                        .or_insert_with(|| "false".to_string());
                }
                self.scripts += 1;
                Section::Script(ScriptSection {
                    role,
                    params,
                    index: self.scripts,
                    init,
                    content: String::new(),
                })
            }
        };
        debug!(section = section.name(), "built section");
        Ok(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::parse_tags;
    use pretty_assertions::assert_eq;
    use testie_subst::{Interface, Node, StaticNodes};
    use testie_types::Value;

    fn testie(tags: &str) -> Testie {
        Testie::new("t", parse_tags(tags))
    }

    fn script(section: Section) -> ScriptSection {
        match section {
            Section::Script(s) => s,
            other => panic!("expected script, got {:?}", other),
        }
    }

    #[test]
    fn test_config_twice_fails_on_second_build() {
        let t = testie("");
        let mut factory = SectionFactory::new();
        assert!(factory.build(&t, "config").is_ok());
        assert_eq!(
            factory.build(&t, "config"),
            Err(TestieError::Grammar(GrammarError::DuplicateSection("config")))
        );
    }

    #[test]
    fn test_duplicate_against_finished_testie() {
        let mut t = testie("");
        Section::Info("hello\n".into()).finish(&mut t).unwrap();
        let mut factory = SectionFactory::new();
        assert!(factory.build(&t, "info").is_err());
    }

    #[test]
    fn test_tag_filtered_sections_are_null() {
        let t = testie("dpdk");
        let mut factory = SectionFactory::new();
        assert_eq!(factory.build(&t, "netmap:script").unwrap(), Section::Null);
        assert_eq!(factory.build(&t, "netmap:config").unwrap(), Section::Null);
        // a filtered singleton does not count as issued
        assert!(matches!(
            factory.build(&t, "dpdk:config").unwrap(),
            Section::Config(_)
        ));
    }

    #[test]
    fn test_script_indices_and_init_defaults() {
        let t = testie("");
        let mut factory = SectionFactory::new();
        let first = script(factory.build(&t, "script@client").unwrap());
        let second = script(factory.build(&t, "init").unwrap());
        assert_eq!((first.index, second.index), (1, 2));
        assert_eq!(second.kind(), ScriptKind::Init);
        assert_eq!(second.autokill().unwrap(), Some(false));
        assert_eq!(first.autokill().unwrap(), None);
        assert_eq!(first.display_name(true), "client [1]");
        assert_eq!(second.display_name(false), "2");
    }

    #[test]
    fn test_script_params() {
        let t = testie("");
        let mut factory = SectionFactory::new();
        let s = script(
            factory
                .build(&t, "script@server name=srv delay=1.5 deps=fastclick,dpdk")
                .unwrap(),
        );
        assert_eq!(s.display_name(true), "srv");
        assert_eq!(s.delay().unwrap(), 1.5);
        assert_eq!(
            s.deps().into_iter().collect::<Vec<_>>(),
            vec!["dpdk".to_string(), "fastclick".to_string()]
        );

        let bad = script(factory.build(&t, "script delay=soon").unwrap());
        assert!(matches!(bad.delay(), Err(TestieError::InvalidParam { .. })));
    }

    struct Repos;

    impl RepositoryRegistry for Repos {
        type Handle = String;
        type Error = String;

        fn repository(&self, name: &str) -> std::result::Result<String, String> {
            if name == "missing" {
                Err(format!("no repository {}", name))
            } else {
                Ok(format!("repo/{}", name))
            }
        }
    }

    #[test]
    fn test_deps_repos() {
        let mut s = script(SectionFactory::new().build(&testie(""), "script").unwrap());
        s.params.insert("deps".into(), "a,b".into());
        assert_eq!(s.deps_repos(&Repos).unwrap(), vec!["repo/a", "repo/b"]);
        s.params.insert("deps".into(), "missing".into());
        assert!(s.deps_repos(&Repos).is_err());
    }

    #[test]
    fn test_import_targets() {
        let t = testie("");
        let mut factory = SectionFactory::new();
        match factory.build(&t, "import@client dpdk-bind").unwrap() {
            Section::Import(i) => assert_eq!(i.module, "modules/dpdk-bind"),
            other => panic!("unexpected {:?}", other),
        }
        match factory.build(&t, "import testie=tests/base.testie").unwrap() {
            Section::Import(i) => {
                assert_eq!(i.module, "tests/base.testie");
                assert!(i.params.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            factory.build(&t, "import@client"),
            Err(TestieError::Grammar(GrammarError::MissingImportTarget))
        );
    }

    #[test]
    fn test_import_rejects_content() {
        let mut t = testie("");
        let mut section = SectionFactory::new().build(&t, "import mod").unwrap();
        section.append_line("echo hi");
        assert!(matches!(
            section.finish(&mut t),
            Err(TestieError::Grammar(GrammarError::ImportWithContent(_)))
        ));
    }

    #[test]
    fn test_finish_routes_sections() {
        let mut t = testie("");
        let mut factory = SectionFactory::new();
        for header in ["file a.txt", "init-file b.txt", "require", "include x.testie"] {
            factory.build(&t, header).unwrap().finish(&mut t).unwrap();
        }
        assert_eq!(t.files.len(), 1);
        assert_eq!(t.init_files.len(), 1);
        assert_eq!(t.requirements[0].role(), "default");
        assert!(t.imports[0].is_include);
    }

    #[test]
    fn test_null_section_discards_content() {
        let mut s = Section::Null;
        s.append_line("anything");
        assert_eq!(s.content(), "");
    }

    #[test]
    fn test_resolve_script_with_self_role() {
        let mut nodes = StaticNodes::new();
        let iface: Interface = [("ip".to_string(), "10.0.0.9".to_string())].into();
        nodes.insert("server", Node::new("srv").with_interface(iface));

        let mut s = script(SectionFactory::new().build(&testie(""), "script@dut").unwrap());
        s.content = "ping -s $SIZE ${self:0:ip}\n".into();
        let row = Row::from([("SIZE".to_string(), Value::text("64"))]);
        let role_map = BTreeMap::from([("dut".to_string(), "server".to_string())]);
        assert_eq!(
            s.resolve(&row, Some(&nodes), &role_map).unwrap(),
            "ping -s 64 10.0.0.9\n"
        );
    }

    #[test]
    fn test_noparse_file_is_verbatim() {
        let f = FileSection {
            role: None,
            filename: "x.click".into(),
            noparse: true,
            init: false,
            content: "$(not arithmetic)".into(),
        };
        assert!(Section::File(f.clone()).noparse());
        assert_eq!(
            f.resolve(&Row::new(), None, &BTreeMap::new()).unwrap(),
            "$(not arithmetic)"
        );
    }
}
