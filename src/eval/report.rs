use serde::Serialize;

use crate::analyzer::VerdictReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub total: usize,
    pub passed: usize,
    pub cases: Vec<CaseReport>,
}

impl EvalReport {
    pub fn push(&mut self, case: CaseReport) {
        self.total += 1;
        if case.pass {
            self.passed += 1;
        }
        self.cases.push(case);
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub pass: bool,
    pub failures: Vec<String>,
    pub iterations: usize,
    pub verdict: Option<VerdictReport>,
}

impl CaseReport {
    pub fn failed(name: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pass: false,
            failures: vec![failure.into()],
            iterations: 0,
            verdict: None,
        }
    }
}
