//! Executes an endpoint's deployment as a sequence of shell steps.
//!
//! Steps run in order: `pre_deploy` (optional), `update`, `post_deploy`
//! (optional). Each step is `bash -c <script>` in the endpoint's
//! `local_path`, optionally as another user via `sudo -n -u`, with a
//! timeout. The first failing step ends the run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::error::DispatchError;
use crate::models::webhook::WebhookEndpoint;
use crate::services::webhook_service::is_valid_deploy_user;

/// Captured output is tail-truncated to this many bytes per stream.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// One accepted delivery waiting to be deployed.
#[derive(Debug, Clone)]
pub struct DeployTrigger {
    pub event_type: String,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pusher: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(StepReport::succeeded)
    }

    /// Error text of the failing step, if any.
    pub fn failure(&self) -> Option<String> {
        let step = self.steps.iter().find(|s| !s.succeeded())?;
        let detail = if step.stderr.trim().is_empty() {
            step.stdout.trim()
        } else {
            step.stderr.trim()
        };
        Some(format!(
            "{} failed (exit {}): {}",
            step.name, step.exit_code, detail
        ))
    }

    /// Combined log of every step that ran.
    pub fn output(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&format!(
                "== {} (exit {}, {} ms) ==\n",
                step.name, step.exit_code, step.duration_ms
            ));
            out.push_str(&step.stdout);
            if !step.stderr.is_empty() {
                if !step.stdout.is_empty() && !step.stdout.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&step.stderr);
            }
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// Executes the deployment for one endpoint.
#[async_trait]
pub trait DeployRunner: Send + Sync {
    async fn run(
        &self,
        endpoint: &WebhookEndpoint,
        trigger: &DeployTrigger,
    ) -> Result<DeployReport, DispatchError>;
}

pub struct ShellDeployRunner {
    update_command: String,
    step_timeout: Duration,
    current_user: Option<String>,
}

impl ShellDeployRunner {
    pub fn new(update_command: impl Into<String>, step_timeout: Duration) -> Self {
        Self {
            update_command: update_command.into(),
            step_timeout,
            current_user: std::env::var("USER").ok(),
        }
    }

    fn command(&self, script: &str, endpoint: &WebhookEndpoint, env: &[(&str, String)]) -> Command {
        let run_as = endpoint
            .deploy_user
            .as_deref()
            .filter(|u| !u.is_empty() && Some(*u) != self.current_user.as_deref());

        let mut cmd = match run_as {
            Some(user) => {
                let preserve: Vec<&str> = env.iter().map(|(k, _)| *k).collect();
                let mut cmd = Command::new("sudo");
                cmd.args(["-n", "-H", "-u", user])
                    .arg(format!("--preserve-env={}", preserve.join(",")))
                    .args(["--", "bash", "-c", script]);
                cmd
            }
            None => {
                let mut cmd = Command::new("bash");
                cmd.args(["-c", script]);
                cmd
            }
        };

        cmd.current_dir(&endpoint.local_path)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the
        // script started.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn run_step(
        &self,
        name: &'static str,
        script: &str,
        endpoint: &WebhookEndpoint,
        env: &[(&str, String)],
    ) -> StepReport {
        let start = Instant::now();
        let (exit_code, stdout, stderr, timed_out) = match self.command(script, endpoint, env).spawn() {
            Err(e) => (-1, String::new(), format!("Failed to execute command: {e}"), false),
            Ok(child) => {
                let pid = child.id();
                match tokio::time::timeout(self.step_timeout, child.wait_with_output()).await {
                    Ok(Ok(output)) => (
                        output.status.code().unwrap_or(-1),
                        truncate_tail(String::from_utf8_lossy(&output.stdout).into_owned()),
                        truncate_tail(String::from_utf8_lossy(&output.stderr).into_owned()),
                        false,
                    ),
                    Ok(Err(e)) => (-1, String::new(), format!("Failed to execute command: {e}"), false),
                    Err(_) => {
                        if let Some(pid) = pid {
                            kill_process_group(pid);
                        }
                        tracing::warn!(
                            webhook_id = endpoint.id,
                            step = name,
                            "Deploy step timed out, process group killed"
                        );
                        (
                            -1,
                            String::new(),
                            format!("Step timed out after {:?}", self.step_timeout),
                            true,
                        )
                    }
                }
            }
        };

        StepReport {
            name,
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
        }
    }
}

#[async_trait]
impl DeployRunner for ShellDeployRunner {
    async fn run(
        &self,
        endpoint: &WebhookEndpoint,
        trigger: &DeployTrigger,
    ) -> Result<DeployReport, DispatchError> {
        let path = PathBuf::from(&endpoint.local_path);
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(DispatchError::PathMissing(path));
        }
        if let Some(user) = endpoint.deploy_user.as_deref().filter(|u| !u.is_empty()) {
            if !is_valid_deploy_user(user) {
                return Err(DispatchError::InvalidDeployUser(user.to_string()));
            }
        }

        let env = deploy_env(endpoint, trigger);
        let steps = [
            ("pre_deploy", endpoint.pre_deploy_script.as_deref()),
            ("update", Some(self.update_command.as_str())),
            ("post_deploy", endpoint.post_deploy_script.as_deref()),
        ];

        let start = Instant::now();
        let mut report = DeployReport::default();

        for (name, script) in steps {
            let Some(script) = script.filter(|s| !s.trim().is_empty()) else {
                continue;
            };

            tracing::info!(webhook_id = endpoint.id, step = name, "Running deploy step");
            let step = self.run_step(name, script, endpoint, &env).await;
            crate::metrics::step_duration(name, step.duration_ms);

            let passed = step.succeeded();
            if passed {
                tracing::info!(
                    webhook_id = endpoint.id,
                    step = name,
                    duration_ms = step.duration_ms,
                    "Deploy step passed"
                );
            } else {
                tracing::warn!(
                    webhook_id = endpoint.id,
                    step = name,
                    exit_code = step.exit_code,
                    timed_out = step.timed_out,
                    "Deploy step failed"
                );
            }

            report.steps.push(step);
            if !passed {
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }
}

/// Environment handed to every step.
fn deploy_env(endpoint: &WebhookEndpoint, trigger: &DeployTrigger) -> Vec<(&'static str, String)> {
    let branch = trigger
        .branch
        .clone()
        .or_else(|| endpoint.branch_filter().map(str::to_string))
        .unwrap_or_default();

    let mut env = vec![
        ("DEPLOY_WEBHOOK_ID", endpoint.id.to_string()),
        ("DEPLOY_EVENT", trigger.event_type.clone()),
        ("DEPLOY_BRANCH", branch),
        ("DEPLOY_COMMIT", trigger.commit_sha.clone().unwrap_or_default()),
        ("DEPLOY_PUSHER", trigger.pusher.clone().unwrap_or_default()),
        ("DEPLOY_PATH", endpoint.local_path.clone()),
    ];
    if let Some(key) = endpoint.ssh_key_path.as_deref().filter(|k| !k.is_empty()) {
        env.push((
            "GIT_SSH_COMMAND",
            format!(
                "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                shell_quote(key)
            ),
        ));
    }
    env
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Keep the last `MAX_OUTPUT_BYTES` of `text`, on a char boundary.
fn truncate_tail(text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut start = text.len() - MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...truncated...\n{}", &text[start..])
}

/// SIGKILL the step's whole process group. The group id is the pid of the
/// shell that leads it.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes no pointers. An already empty group yields ESRCH.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, "Failed to kill step process group: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryWebhookRepository;
    use crate::services::webhook_store::WebhookRepository;
    use crate::test_support::{new_endpoint, temp_dir};

    fn trigger() -> DeployTrigger {
        DeployTrigger {
            event_type: "push".into(),
            branch: Some("main".into()),
            commit_sha: Some("abc123".into()),
            pusher: Some("octocat".into()),
            received_at: Utc::now(),
        }
    }

    async fn endpoint_with(
        dir: &std::path::Path,
        pre: Option<&str>,
        post: Option<&str>,
    ) -> WebhookEndpoint {
        let repo = MemoryWebhookRepository::default();
        let mut new = new_endpoint(dir);
        new.pre_deploy_script = pre.map(str::to_string);
        new.post_deploy_script = post.map(str::to_string);
        repo.create(new).await.unwrap()
    }

    #[tokio::test]
    async fn runs_all_steps_in_order_with_deploy_env() {
        let tmp = temp_dir("runner-ok");
        let dir = tmp.path();
        let endpoint = endpoint_with(
            dir,
            Some("echo pre >> steps.log"),
            Some(r#"echo post >> steps.log; echo "$DEPLOY_BRANCH $DEPLOY_COMMIT" > env.txt"#),
        )
        .await;
        let runner = ShellDeployRunner::new("echo update >> steps.log", Duration::from_secs(10));

        let report = runner.run(&endpoint, &trigger()).await.unwrap();
        assert!(report.succeeded(), "{}", report.output());
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.failure(), None);

        let log = std::fs::read_to_string(dir.join("steps.log")).unwrap();
        assert_eq!(log, "pre\nupdate\npost\n");
        let env = std::fs::read_to_string(dir.join("env.txt")).unwrap();
        assert_eq!(env.trim(), "main abc123");
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let tmp = temp_dir("runner-fail");
        let dir = tmp.path();
        let endpoint = endpoint_with(
            dir,
            Some("echo 'migration exploded' >&2; exit 3"),
            Some("touch post-ran"),
        )
        .await;
        let runner = ShellDeployRunner::new("touch update-ran", Duration::from_secs(10));

        let report = runner.run(&endpoint, &trigger()).await.unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].exit_code, 3);
        let failure = report.failure().unwrap();
        assert!(failure.contains("pre_deploy"), "{failure}");
        assert!(failure.contains("migration exploded"), "{failure}");
        assert!(!dir.join("update-ran").exists());
        assert!(!dir.join("post-ran").exists());
    }

    #[tokio::test]
    async fn step_timeout_is_a_failure() {
        let tmp = temp_dir("runner-timeout");
        let endpoint = endpoint_with(tmp.path(), None, None).await;
        let runner = ShellDeployRunner::new("sleep 5", Duration::from_millis(200));

        let started = Instant::now();
        let report = runner.run(&endpoint, &trigger()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!report.succeeded());
        assert!(report.steps[0].timed_out);
        assert!(report.failure().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn timeout_kills_background_children_of_the_step() {
        let tmp = temp_dir("runner-orphans");
        let endpoint = endpoint_with(tmp.path(), None, None).await;
        let runner = ShellDeployRunner::new(
            "(sleep 1; touch late-write) ; wait",
            Duration::from_millis(200),
        );

        let report = runner.run(&endpoint, &trigger()).await.unwrap();
        assert!(report.steps[0].timed_out);

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!tmp.path().join("late-write").exists());
    }

    #[tokio::test]
    async fn missing_path_is_fatal() {
        let tmp = temp_dir("runner-missing");
        let dir = tmp.path().join("does-not-exist");
        let endpoint = endpoint_with(&dir, None, None).await;
        let runner = ShellDeployRunner::new("true", Duration::from_secs(1));

        let err = runner.run(&endpoint, &trigger()).await.unwrap_err();
        assert!(matches!(err, DispatchError::PathMissing(p) if p == dir));
    }

    #[tokio::test]
    async fn invalid_deploy_user_is_fatal() {
        let tmp = temp_dir("runner-user");
        let mut endpoint = endpoint_with(tmp.path(), None, None).await;
        endpoint.deploy_user = Some("root; id".into());
        let runner = ShellDeployRunner::new("true", Duration::from_secs(1));

        let err = runner.run(&endpoint, &trigger()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidDeployUser(_)));
    }

    #[test]
    fn ssh_key_becomes_git_ssh_command() {
        let endpoint_dir = PathBuf::from("/srv/site");
        let mut endpoint = WebhookEndpoint {
            id: 7,
            name: "site".into(),
            domain: None,
            git_provider: "github".into(),
            repository_url: "git@github.com:acme/site.git".into(),
            branch: Some("main".into()),
            local_path: endpoint_dir.display().to_string(),
            deploy_user: None,
            secret_token: String::new(),
            pre_deploy_script: None,
            post_deploy_script: None,
            ssh_key_path: Some("/keys/it's.pem".into()),
            is_active: true,
            last_deployed_at: None,
            last_outcome: None,
            create_date: Utc::now(),
            write_date: Utc::now(),
        };
        let mut no_branch = trigger();
        no_branch.branch = None;

        let env = deploy_env(&endpoint, &no_branch);
        let lookup = |key: &str| env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone());
        assert_eq!(lookup("DEPLOY_BRANCH").as_deref(), Some("main"));
        assert_eq!(lookup("DEPLOY_WEBHOOK_ID").as_deref(), Some("7"));
        assert_eq!(
            lookup("GIT_SSH_COMMAND").as_deref(),
            Some(r"ssh -i '/keys/it'\''s.pem' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new")
        );

        endpoint.ssh_key_path = None;
        assert!(deploy_env(&endpoint, &no_branch)
            .iter()
            .all(|(k, _)| *k != "GIT_SSH_COMMAND"));
    }

    #[test]
    fn truncation_keeps_tail_on_char_boundary() {
        let text = format!("{}{}", "é".repeat(MAX_OUTPUT_BYTES), "tail");
        let truncated = truncate_tail(text);
        assert!(truncated.starts_with("...truncated...\n"));
        assert!(truncated.ends_with("tail"));
        assert!(truncated.len() <= MAX_OUTPUT_BYTES + 16);

        assert_eq!(truncate_tail("short".into()), "short");
    }
}
