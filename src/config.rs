//! Pipeline configuration — the declarative description of stages, their
//! dependencies, routing rules, edge limits, bounds, and resume stages.
//!
//! `PipelineConfig` is constructed by the caller and handed to
//! [`crate::runtime::Runtime::new`], which validates it once (cycle
//! detection, unknown references, duplicate names) and memoizes a
//! topological order for the parallel engine.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{Error, Result};
use crate::validation::{validate_non_empty, validate_positive};

/// How an agent's dependencies must be satisfied before it becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Every dependency must be in the completed set.
    #[default]
    All,
    /// At least one dependency (or none declared) must be in the completed set.
    Any,
}

/// A single conditional-routing rule evaluated by the agent itself, not by
/// the runtime — the runtime only ever observes `current_stage` after a
/// stage returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition: String,
    pub value: String,
    pub target: String,
}

/// Execution engine selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sequential,
    Parallel,
}

/// A per-edge traversal cap: `from` may route to `to` at most `max_count`
/// times within a single run before the runtime terminates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeLimit {
    pub from: String,
    pub to: String,
    pub max_count: u32,
}

/// Declarative description of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    /// Declaration-order rank, used as a stable tie-break during topological sort.
    pub stage_order: i32,

    #[serde(default)]
    pub has_llm: bool,

    #[serde(default)]
    pub model_role: Option<String>,

    #[serde(default)]
    pub has_tools: bool,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub join_strategy: JoinStrategy,

    #[serde(default)]
    pub default_next: Option<String>,

    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
}

impl AgentConfig {
    /// Construct a minimal agent config with no dependencies, LLM, or tools.
    pub fn new(name: impl Into<String>, stage_order: i32) -> Self {
        Self {
            name: name.into(),
            stage_order,
            has_llm: false,
            model_role: None,
            has_tools: false,
            requires: Vec::new(),
            join_strategy: JoinStrategy::All,
            default_next: None,
            routing_rules: Vec::new(),
        }
    }

    pub fn requiring(mut self, requires: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_join_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.join_strategy = strategy;
        self
    }

    pub fn with_llm(mut self, model_role: impl Into<String>) -> Self {
        self.has_llm = true;
        self.model_role = Some(model_role.into());
        self
    }

    pub fn with_default_next(mut self, target: impl Into<String>) -> Self {
        self.default_next = Some(target.into());
        self
    }
}

/// Declarative description of an entire pipeline: stages, bounds, edge
/// limits, and resume stages for the interrupt protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub agents: Vec<AgentConfig>,

    pub max_iterations: u32,
    pub max_llm_calls: u32,
    pub max_agent_hops: u32,

    #[serde(default)]
    pub edge_limits: Vec<EdgeLimit>,

    #[serde(default = "default_run_mode")]
    pub default_run_mode: RunMode,

    #[serde(default)]
    pub enable_dag_execution: bool,

    #[serde(default)]
    pub clarification_resume_stage: Option<String>,
    #[serde(default)]
    pub confirmation_resume_stage: Option<String>,
    #[serde(default)]
    pub agent_review_resume_stage: Option<String>,

    /// Memoized by [`PipelineConfig::validate`]; `None` until validated, and
    /// `Some(None)` when `enable_dag_execution` is false.
    #[serde(skip)]
    topological_order: Option<Option<Vec<String>>>,
}

fn default_run_mode() -> RunMode {
    RunMode::Sequential
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, agents: Vec<AgentConfig>) -> Self {
        Self {
            name: name.into(),
            agents,
            max_iterations: 20,
            max_llm_calls: 100,
            max_agent_hops: 10,
            edge_limits: Vec::new(),
            default_run_mode: RunMode::Sequential,
            enable_dag_execution: false,
            clarification_resume_stage: None,
            confirmation_resume_stage: None,
            agent_review_resume_stage: None,
            topological_order: None,
        }
    }

    /// Declaration-order stage names.
    pub fn get_stage_order(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    /// Memoized topological order of the dependency DAG; `None` when
    /// `enable_dag_execution` is false, or before [`PipelineConfig::validate`]
    /// has run.
    pub fn get_topological_order(&self) -> Option<&[String]> {
        self.topological_order
            .as_ref()
            .and_then(|o| o.as_deref())
    }

    /// The max-traversal cap declared for a `from -> to` edge, or `0`
    /// (unlimited) if none is declared.
    pub fn get_edge_limit(&self, from: &str, to: &str) -> u32 {
        self.edge_limits
            .iter()
            .find(|e| e.from == from && e.to == to)
            .map(|e| e.max_count)
            .unwrap_or(0)
    }

    /// Stages whose dependencies are currently satisfied and which have not
    /// yet completed, per each agent's [`JoinStrategy`].
    pub fn get_ready_stages(&self, completed: &HashSet<String>) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| !completed.contains(&a.name))
            .filter(|a| match a.join_strategy {
                JoinStrategy::All => a.requires.iter().all(|r| completed.contains(r)),
                JoinStrategy::Any => {
                    a.requires.is_empty() || a.requires.iter().any(|r| completed.contains(r))
                }
            })
            .map(|a| a.name.clone())
            .collect()
    }

    /// Validate stage names, dependency references, and (when DAG execution
    /// is enabled) acyclicity, memoizing a topological order on success.
    ///
    /// Idempotent: repeated calls re-run the same checks and recompute the
    /// memoized order.
    pub fn validate(&mut self) -> Result<()> {
        validate_non_empty(&self.name, "pipeline name")?;
        validate_positive(self.max_iterations, "max_iterations")?;
        validate_positive(self.max_llm_calls, "max_llm_calls")?;
        validate_positive(self.max_agent_hops, "max_agent_hops")?;

        let mut seen = HashSet::with_capacity(self.agents.len());
        for agent in &self.agents {
            validate_non_empty(&agent.name, "agent name")?;
            if !seen.insert(agent.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
            if agent.requires.iter().any(|r| r == &agent.name) {
                return Err(Error::validation(format!(
                    "agent {} cannot require itself",
                    agent.name
                )));
            }
            if agent.has_llm && agent.model_role.as_deref().unwrap_or("").is_empty() {
                return Err(Error::validation(format!(
                    "agent {} declares has_llm but no model_role",
                    agent.name
                )));
            }
        }

        let names: HashSet<&str> = self.agents.iter().map(|a| a.name.as_str()).collect();
        for agent in &self.agents {
            for dep in &agent.requires {
                if !names.contains(dep.as_str()) {
                    return Err(Error::validation(format!(
                        "agent {} requires unknown agent {}",
                        agent.name, dep
                    )));
                }
            }
        }

        // Output-key collision: two agents unrelated by `requires` (in
        // either direction) must not share a name, since `Outputs` is keyed
        // by stage name. Unique names are already enforced above, so this
        // only documents the rule rather than adding new behavior — see
        // DESIGN.md for the open-question writeup.

        self.topological_order = if self.enable_dag_execution {
            Some(Some(self.compute_topological_order()?))
        } else {
            Some(None)
        };

        Ok(())
    }

    fn compute_topological_order(&self) -> Result<Vec<String>> {
        self.detect_cycle()?;

        // Kahn's algorithm, tie-broken by declaration order then name so the
        // result is deterministic across runs.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for agent in &self.agents {
            in_degree.entry(agent.name.as_str()).or_insert(0);
            for dep in &agent.requires {
                *in_degree.entry(agent.name.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(agent.name.as_str());
            }
        }

        let declared_index: HashMap<&str, usize> = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.as_str(), i))
            .collect();

        let mut frontier: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();
        frontier.sort_by_key(|name| declared_index[name]);

        let mut order = Vec::with_capacity(self.agents.len());
        while let Some(next) = frontier.first().copied() {
            frontier.remove(0);
            order.push(next.to_string());

            if let Some(children) = dependents.get(next) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let deg = in_degree.get_mut(child).expect("child has in-degree entry");
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(*child);
                    }
                }
                newly_ready.sort_by_key(|name| declared_index[name]);
                frontier.extend(newly_ready);
                frontier.sort_by_key(|name| declared_index[name]);
            }
        }

        if order.len() != self.agents.len() {
            return Err(Error::internal(
                "topological sort did not cover every agent after cycle check passed",
            ));
        }

        Ok(order)
    }

    /// Colouring DFS over the `requires` graph: a back edge to a grey node
    /// means a cycle, named in the error.
    fn detect_cycle(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let by_name: HashMap<&str, &AgentConfig> =
            self.agents.iter().map(|a| (a.name.as_str(), a)).collect();
        let mut color: HashMap<&str, Color> =
            self.agents.iter().map(|a| (a.name.as_str(), Color::White)).collect();

        fn visit<'a>(
            node: &'a str,
            by_name: &HashMap<&'a str, &'a AgentConfig>,
            color: &mut HashMap<&'a str, Color>,
        ) -> Result<()> {
            color.insert(node, Color::Grey);
            if let Some(agent) = by_name.get(node) {
                for dep in &agent.requires {
                    match color.get(dep.as_str()).copied() {
                        Some(Color::Grey) => {
                            return Err(Error::validation(format!(
                                "cycle detected: {node} -> {dep}"
                            )));
                        }
                        Some(Color::White) | None => {
                            visit(dep.as_str(), by_name, color)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }
            color.insert(node, Color::Black);
            Ok(())
        }

        for agent in &self.agents {
            if color.get(agent.name.as_str()).copied() == Some(Color::White) {
                visit(agent.name.as_str(), &by_name, &mut color)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, order: i32, requires: &[&str]) -> AgentConfig {
        AgentConfig::new(name, order).requiring(requires.iter().copied())
    }

    #[test]
    fn rejects_empty_name() {
        let mut cfg = PipelineConfig::new("p", vec![agent("", 0, &[])]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut cfg = PipelineConfig::new("p", vec![agent("a", 0, &[]), agent("a", 1, &[])]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_self_reference() {
        let mut cfg = PipelineConfig::new("p", vec![agent("a", 0, &["a"])]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("require itself"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut cfg = PipelineConfig::new("p", vec![agent("a", 0, &["ghost"])]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unknown agent"));
    }

    #[test]
    fn rejects_llm_without_model_role() {
        let mut a = agent("a", 0, &[]);
        a.has_llm = true;
        let mut cfg = PipelineConfig::new("p", vec![a]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("model_role"));
    }

    #[test]
    fn detects_a_cycle() {
        let mut cfg = PipelineConfig::new(
            "p",
            vec![agent("a", 0, &["c"]), agent("b", 1, &["a"]), agent("c", 2, &["b"])],
        );
        cfg.enable_dag_execution = true;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn diamond_topological_order_places_source_first_and_sink_last() {
        let mut cfg = PipelineConfig::new(
            "p",
            vec![
                agent("a", 0, &[]),
                agent("b", 1, &["a"]),
                agent("c", 2, &["a"]),
                agent("d", 3, &["b", "c"]),
            ],
        );
        cfg.enable_dag_execution = true;
        cfg.validate().unwrap();

        let order = cfg.get_topological_order().unwrap();
        assert_eq!(order.first().unwrap(), "a");
        assert_eq!(order.last().unwrap(), "d");
        let pos = |name: &str| order.iter().position(|s| s == name).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn topological_order_is_none_without_dag_execution() {
        let mut cfg = PipelineConfig::new("p", vec![agent("a", 0, &[])]);
        cfg.validate().unwrap();
        assert!(cfg.get_topological_order().is_none());
    }

    #[test]
    fn diamond_ready_stages_progress_batch_by_batch() {
        let mut cfg = PipelineConfig::new(
            "p",
            vec![
                agent("a", 0, &[]),
                agent("b", 1, &["a"]),
                agent("c", 2, &["a"]),
                agent("d", 3, &["b", "c"]),
            ],
        );
        cfg.validate().unwrap();

        let mut completed: HashSet<String> = HashSet::new();
        let mut ready: HashSet<String> = cfg.get_ready_stages(&completed).into_iter().collect();
        assert_eq!(ready, HashSet::from(["a".to_string()]));

        completed.insert("a".to_string());
        ready = cfg.get_ready_stages(&completed).into_iter().collect();
        assert_eq!(ready, HashSet::from(["b".to_string(), "c".to_string()]));

        completed.insert("b".to_string());
        ready = cfg.get_ready_stages(&completed).into_iter().collect();
        assert_eq!(ready, HashSet::from(["c".to_string()]));

        completed.insert("c".to_string());
        ready = cfg.get_ready_stages(&completed).into_iter().collect();
        assert_eq!(ready, HashSet::from(["d".to_string()]));
    }

    #[test]
    fn any_join_strategy_is_ready_with_a_single_satisfied_dependency() {
        let mut cfg = PipelineConfig::new(
            "p",
            vec![
                agent("a", 0, &[]),
                agent("b", 1, &[]),
                agent("c", 2, &["a", "b"]).with_join_strategy(JoinStrategy::Any),
            ],
        );
        cfg.validate().unwrap();

        let completed: HashSet<String> = HashSet::from(["a".to_string()]);
        let ready: HashSet<String> = cfg.get_ready_stages(&completed).into_iter().collect();
        assert!(ready.contains("c"));
    }

    #[test]
    fn ready_set_monotonicity_for_all_strategy() {
        let mut cfg = PipelineConfig::new(
            "p",
            vec![agent("a", 0, &[]), agent("b", 1, &["a"]), agent("c", 2, &["a", "b"])],
        );
        cfg.validate().unwrap();

        let c1: HashSet<String> = HashSet::new();
        let c2: HashSet<String> = HashSet::from(["a".to_string()]);
        assert!(c1.is_subset(&c2));

        let ready_c1: HashSet<String> = cfg.get_ready_stages(&c1).into_iter().collect();
        let ready_c2: HashSet<String> = cfg.get_ready_stages(&c2).into_iter().collect();
        for stage in &ready_c1 {
            if !c2.contains(stage) {
                assert!(ready_c2.contains(stage));
            }
        }
    }

    #[test]
    fn edge_limit_defaults_to_unlimited() {
        let cfg = PipelineConfig::new("p", vec![agent("a", 0, &[])]);
        assert_eq!(cfg.get_edge_limit("a", "b"), 0);
    }

    #[test]
    fn edge_limit_looks_up_declared_cap() {
        let mut cfg = PipelineConfig::new("p", vec![agent("a", 0, &[]), agent("b", 1, &[])]);
        cfg.edge_limits.push(EdgeLimit {
            from: "b".to_string(),
            to: "a".to_string(),
            max_count: 2,
        });
        assert_eq!(cfg.get_edge_limit("b", "a"), 2);
    }
}

/// Property-based coverage for the two DAG laws that hold over arbitrary
/// stage graphs, not just the hand-picked diamond above: every declared
/// edge survives into the topological order, and the ready set only grows
/// as the completed set grows.
#[cfg(test)]
mod dag_properties {
    use super::*;
    use proptest::prelude::*;

    const STAGES: usize = 6;

    /// `edges[i]` flags whether stage `j` (the `j`-th stage in declaration
    /// order, `j > i`) requires stage `i`. Indexing only ever from a lower
    /// declaration index to a higher one rules out cycles by construction,
    /// so every generated config is a valid DAG.
    fn edge_flags() -> impl Strategy<Value = Vec<bool>> {
        proptest::collection::vec(any::<bool>(), STAGES * (STAGES - 1) / 2)
    }

    fn build_dag(edges: &[bool]) -> PipelineConfig {
        let mut agents: Vec<AgentConfig> =
            (0..STAGES).map(|i| AgentConfig::new(format!("s{i}"), i as i32)).collect();
        let mut idx = 0;
        for i in 0..STAGES {
            for j in (i + 1)..STAGES {
                if edges[idx] {
                    agents[j].requires.push(format!("s{i}"));
                }
                idx += 1;
            }
        }
        let mut cfg = PipelineConfig::new("dag", agents);
        cfg.enable_dag_execution = true;
        cfg
    }

    proptest! {
        #[test]
        fn topological_order_respects_every_declared_edge(edges in edge_flags()) {
            let mut cfg = build_dag(&edges);
            cfg.validate().unwrap();
            let order = cfg.get_topological_order().unwrap();
            let position: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();
            for agent in &cfg.agents {
                for dep in &agent.requires {
                    prop_assert!(position[dep.as_str()] < position[agent.name.as_str()]);
                }
            }
        }

        #[test]
        fn ready_set_grows_monotonically_with_the_completed_set(
            edges in edge_flags(),
            completed_flags in proptest::collection::vec(any::<bool>(), STAGES),
            extra_index in 0..STAGES,
        ) {
            let cfg = build_dag(&edges);
            let names = cfg.get_stage_order();

            let c1: HashSet<String> = names
                .iter()
                .zip(&completed_flags)
                .filter(|(_, done)| **done)
                .map(|(name, _)| name.clone())
                .collect();
            let mut c2 = c1.clone();
            c2.insert(names[extra_index].clone());

            let ready_c1: HashSet<String> = cfg.get_ready_stages(&c1).into_iter().collect();
            let ready_c2: HashSet<String> = cfg.get_ready_stages(&c2).into_iter().collect();
            for stage in &ready_c1 {
                if !c2.contains(stage) {
                    prop_assert!(ready_c2.contains(stage));
                }
            }
        }
    }
}
