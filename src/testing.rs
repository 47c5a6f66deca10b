//! Scripted command runner shared by unit tests.
//!
//! Rules match on the rendered command line (`CommandSpec::display`) by
//! prefix. The first matching rule answers; its replies are consumed in order
//! and the last one repeats. Unmatched commands fail with exit code 127.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ProcessError;
use crate::process::{CommandRunner, CommandSpec, ProcessOutput};

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    /// Emit each line through `on_stdout` before succeeding.
    Stream(Vec<String>),
    Fail(String),
    /// Succeed after a delay (tokio clock, so paused tests advance instantly).
    Delay(Duration, String),
    /// Never finish on its own; honours the command timeout if one is set.
    Hang,
}

struct Rule {
    prefix: String,
    replies: VecDeque<Reply>,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub line: String,
    pub stdin: Option<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, prefix: &str, replies: Vec<Reply>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn ok(&self, prefix: &str, stdout: &str) -> &Self {
        self.on(prefix, vec![Reply::Ok(stdout.to_string())])
    }

    pub fn fail(&self, prefix: &str, stderr: &str) -> &Self {
        self.on(prefix, vec![Reply::Fail(stderr.to_string())])
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.line).collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    fn next_reply(&self, line: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| line.starts_with(&r.prefix))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let line = spec.display();
        self.calls.lock().unwrap().push(Call {
            line: line.clone(),
            stdin: spec.stdin.clone(),
        });

        let failed = |stderr: String| ProcessError::Failed {
            program: spec.program.clone(),
            exit_code: Some(1),
            signal: None,
            stdout: String::new(),
            stderr,
        };

        match self.next_reply(&line) {
            None => Err(ProcessError::Failed {
                program: spec.program.clone(),
                exit_code: Some(127),
                signal: None,
                stdout: String::new(),
                stderr: format!("unscripted command: {}", line),
            }),
            Some(Reply::Ok(stdout)) => Ok(ProcessOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Stream(lines)) => {
                let mut stdout = String::new();
                for l in lines {
                    if let Some(ref cb) = spec.on_stdout {
                        cb(&l);
                    }
                    stdout.push_str(&l);
                    stdout.push('\n');
                    tokio::task::yield_now().await;
                }
                Ok(ProcessOutput {
                    stdout,
                    stderr: String::new(),
                })
            }
            Some(Reply::Fail(stderr)) => Err(failed(stderr)),
            Some(Reply::Delay(delay, stdout)) => match spec.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    Err(ProcessError::TimedOut {
                        program: spec.program.clone(),
                        timeout: limit,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
                _ => {
                    tokio::time::sleep(delay).await;
                    Ok(ProcessOutput {
                        stdout,
                        stderr: String::new(),
                    })
                }
            },
            Some(Reply::Hang) => match spec.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    Err(ProcessError::TimedOut {
                        program: spec.program.clone(),
                        timeout: limit,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
                None => std::future::pending().await,
            },
        }
    }
}
