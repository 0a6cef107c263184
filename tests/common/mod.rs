#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use sandjudge::judge::{EvaluationPolicy, Evaluator, JudgeSettings, TestCase, TestCaseSource};
use sandjudge::language::{INPUT_FILE_NAME, LanguageProfile, LanguageRegistry, default_languages};
use sandjudge::sandbox::{ContainerRuntime, ContainerSpec, ResourceLimits, SandboxAdapter, WorkspaceManager};

/// What a fake unit does once started
#[derive(Debug, Clone)]
pub enum Behavior {
    Exit { code: i64, output: String },
    /// Never terminates on its own
    Hang,
    FailCreate,
    FailStart,
    FailWait,
}

impl Behavior {
    pub fn prints(output: &str) -> Self {
        Self::Exit {
            code: 0,
            output: output.to_string(),
        }
    }

    pub fn crashes(code: i64, output: &str) -> Self {
        Self::Exit {
            code,
            output: output.to_string(),
        }
    }
}

type Program = dyn Fn(&str) -> Behavior + Send + Sync;

/// In-memory container runtime driven by the test case input it finds in
/// the bound workspace
pub struct FakeRuntime {
    program: Box<Program>,
    units: Mutex<HashMap<String, Behavior>>,
    inputs: Mutex<Vec<String>>,
    specs: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicUsize,
    creates: AtomicUsize,
    starts: AtomicUsize,
    kills: AtomicUsize,
    removes: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(program: impl Fn(&str) -> Behavior + Send + Sync + 'static) -> Self {
        Self {
            program: Box::new(program),
            units: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    /// Every unit answers with the same behavior
    pub fn always(behavior: Behavior) -> Self {
        Self::new(move |_| behavior.clone())
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    /// Units created and not yet removed
    pub fn live_units(&self) -> usize {
        self.units.lock().len()
    }

    /// Test case inputs in the order the units were created
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().clone()
    }

    fn behavior(&self, id: &str) -> Result<Behavior> {
        self.units
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("No such unit: {id}"))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let input = std::fs::read_to_string(spec.workspace.join(INPUT_FILE_NAME))?;
        let behavior = (self.program)(&input);
        if let Behavior::FailCreate = behavior {
            bail!("image not found");
        }

        self.inputs.lock().push(input);
        self.specs.lock().push(spec.clone());
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.units.lock().insert(id.clone(), behavior);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.behavior(id)? {
            Behavior::FailStart => bail!("cannot start {id}"),
            _ => Ok(()),
        }
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        match self.behavior(id)? {
            Behavior::Exit { code, .. } => Ok(code),
            Behavior::Hang => std::future::pending().await,
            _ => bail!("connection to runtime lost"),
        }
    }

    async fn kill(&self, _id: &str) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    // Returns everything regardless of `limit`, trimming is up to the caller
    async fn logs(&self, id: &str, _limit: usize) -> Result<Vec<u8>> {
        match self.behavior(id)? {
            Behavior::Exit { output, .. } => Ok(output.into_bytes()),
            _ => Ok(Vec::new()),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.units.lock().remove(id).is_none() {
            bail!("No such unit: {id}");
        }
        Ok(())
    }
}

/// Test cases held in memory, returned exactly as given
#[derive(Default)]
pub struct StaticCases {
    problems: HashMap<u32, Vec<TestCase>>,
    fetches: AtomicUsize,
}

impl StaticCases {
    pub fn with_problem(mut self, problem_id: u32, cases: Vec<TestCase>) -> Self {
        self.problems.insert(problem_id, cases);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestCaseSource for StaticCases {
    async fn fetch_ordered(&self, problem_id: u32) -> Result<Vec<TestCase>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.problems.get(&problem_id).cloned().unwrap_or_default())
    }
}

/// A test case store that is always down
pub struct BrokenCases;

#[async_trait]
impl TestCaseSource for BrokenCases {
    async fn fetch_ordered(&self, _problem_id: u32) -> Result<Vec<TestCase>> {
        bail!("database is locked")
    }
}

pub fn case(order_index: i32, input: &str, expected_output: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected_output.to_string(),
        order_index,
    }
}

/// Workspace root unique to one test, removed when dropped
pub struct TestDir {
    pub path: PathBuf,
}

impl TestDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("sandjudge-test-{}", uuid::Uuid::new_v4()));
        Self { path }
    }

    /// Entries left directly under the root
    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(&self.path)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn fast_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Duration::from_millis(200),
        ..ResourceLimits::default()
    }
}

pub fn build_evaluator(
    cases: Arc<dyn TestCaseSource>,
    runtime: Arc<dyn ContainerRuntime>,
    languages: Vec<LanguageProfile>,
    root: &TestDir,
    settings: JudgeSettings,
) -> Evaluator {
    Evaluator::new(
        cases,
        Arc::new(LanguageRegistry::new(languages).unwrap()),
        WorkspaceManager::new(&root.path).unwrap(),
        SandboxAdapter::new(runtime, "/app"),
        settings,
    )
}

/// Evaluator over the default languages and a fake runtime
pub fn fake_evaluator(
    cases: &Arc<StaticCases>,
    runtime: &Arc<FakeRuntime>,
    root: &TestDir,
    policy: EvaluationPolicy,
) -> Evaluator {
    build_evaluator(
        cases.clone(),
        runtime.clone(),
        default_languages(),
        root,
        JudgeSettings {
            limits: fast_limits(),
            policy,
        },
    )
}
