//! 代码执行服务 - 业务能力层
//!
//! 把生成的代码写入工作目录，用解释器（后端标识）执行

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::models::{ExecutionResult, FetchedContent};
use crate::services::CodeExecutor;

/// 代码执行服务
///
/// 超时由 StageExecutor 控制；子进程设置 kill_on_drop，
/// 调用被超时丢弃时进程随之结束。
pub struct CodeRunner {
    work_dir: PathBuf,
}

impl CodeRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// 在代码前注入工作目录和附件地址变量
    pub fn prepare_code(&self, code: &str, content: &FetchedContent) -> String {
        let mut prepared = format!(
            "import os\nos.makedirs(r'{dir}', exist_ok=True)\nos.chdir(r'{dir}')\n\n",
            dir = self.work_dir.display()
        );
        if !content.files.is_empty() {
            prepared.push_str("# File URLs\n");
            for (name, url) in &content.files {
                prepared.push_str(&format!("{} = r'{}'\n", python_var_name(name), url));
            }
            prepared.push('\n');
        }
        prepared.push_str(code);
        prepared
    }

    fn write_script(
        &self,
        code: &str,
        content: &FetchedContent,
    ) -> Result<NamedTempFile, CallError> {
        let mut script = tempfile::Builder::new()
            .prefix("solution_")
            .suffix(".py")
            .tempfile_in(&self.work_dir)
            .map_err(|e| CallError::Execution(format!("无法创建脚本: {}", e)))?;
        script
            .write_all(self.prepare_code(code, content).as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| CallError::Execution(format!("无法写入脚本: {}", e)))?;
        Ok(script)
    }
}

#[async_trait]
impl CodeExecutor for CodeRunner {
    async fn execute(
        &self,
        code: &str,
        content: &FetchedContent,
        _timeout: Duration,
        backend: &str,
    ) -> Result<ExecutionResult, CallError> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| CallError::Execution(format!("无法创建工作目录: {}", e)))?;

        // 脚本随 guard 一起删除，调用被超时丢弃时也一样
        let script = self.write_script(code, content)?;
        debug!("脚本写入 {}", script.path().display());

        info!("▶️ 执行生成的代码 (解释器: {})", backend);
        let output = Command::new(backend)
            .arg(script.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;
        drop(script);

        let output = output.map_err(|e| CallError::Execution(format!("无法启动 {}: {}", backend, e)))?;
        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !output.status.success() {
            warn!("代码执行失败，退出码 {:?}", result.exit_code);
            return Err(CallError::Execution(result.stderr.trim().to_string()));
        }
        Ok(result)
    }
}

/// 文件名转为合法的 Python 变量名
fn python_var_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        return "file_path".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "file_");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_var_name() {
        assert_eq!(python_var_name("sales-2024.csv"), "sales_2024");
        assert_eq!(python_var_name("2024 report.pdf"), "file_2024_report");
        assert_eq!(python_var_name(".csv"), "file_path");
    }

    #[test]
    fn test_prepare_code_injects_files() {
        let runner = CodeRunner::new("/tmp/quiz");
        let mut content = FetchedContent::default();
        content
            .files
            .insert("data.csv".to_string(), "https://q.example.com/data.csv".to_string());

        let code = runner.prepare_code("print(42)", &content);
        assert!(code.contains("os.chdir(r'/tmp/quiz')"));
        assert!(code.contains("data = r'https://q.example.com/data.csv'"));
        assert!(code.ends_with("print(42)"));
    }

    #[test]
    fn test_script_removed_when_guard_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CodeRunner::new(dir.path());
        let script = runner
            .write_script("print(1)", &FetchedContent::default())
            .unwrap();
        let path = script.path().to_path_buf();
        assert!(path.exists());
        assert!(std::fs::read_to_string(&path).unwrap().ends_with("print(1)"));

        drop(script);
        assert!(!path.exists());
    }

    #[tokio::test]
    #[ignore] // 需要本地 python3
    async fn test_execute_with_python() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CodeRunner::new(dir.path());
        let result = runner
            .execute(
                "print('warmup')\nprint(6 * 7)",
                &FetchedContent::default(),
                Duration::from_secs(10),
                "python3",
            )
            .await
            .unwrap();
        assert_eq!(result.extract_answer(), Some(serde_json::json!(42)));
    }
}
