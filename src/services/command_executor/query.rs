use crate::debug_if_enabled;
use crate::error::ExecError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::time::Duration;
use tracing::info;

const PROCESS_NAMES_PLACEHOLDER: &str = "__PROCESS_NAMES__";
const SCRIPT_FILE_NAME: &str = "enum-windows.ps1";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Перечисляет видимые окна верхнего уровня процессов игры через user32
const ENUM_WINDOWS_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
Add-Type @"
using System;
using System.Text;
using System.Collections.Generic;
using System.Runtime.InteropServices;
public static class DockWin32 {
    public delegate bool EnumWindowsProc(IntPtr hWnd, IntPtr lParam);
    [StructLayout(LayoutKind.Sequential)]
    public struct RECT { public int Left; public int Top; public int Right; public int Bottom; }
    [DllImport("user32.dll")] public static extern bool EnumWindows(EnumWindowsProc cb, IntPtr lParam);
    [DllImport("user32.dll")] public static extern bool IsWindowVisible(IntPtr hWnd);
    [DllImport("user32.dll", CharSet = CharSet.Unicode)] public static extern int GetWindowText(IntPtr hWnd, StringBuilder text, int count);
    [DllImport("user32.dll", CharSet = CharSet.Unicode)] public static extern int GetClassName(IntPtr hWnd, StringBuilder text, int count);
    [DllImport("user32.dll")] public static extern uint GetWindowThreadProcessId(IntPtr hWnd, out uint pid);
    [DllImport("user32.dll")] public static extern IntPtr GetForegroundWindow();
    [DllImport("user32.dll")] public static extern bool GetWindowRect(IntPtr hWnd, out RECT rect);
    public static List<IntPtr> TopLevel() {
        var result = new List<IntPtr>();
        EnumWindows((h, p) => { if (IsWindowVisible(h)) { result.Add(h); } return true; }, IntPtr.Zero);
        return result;
    }
}
"@
$names = @(__PROCESS_NAMES__)
$pids = @{}
Get-Process -Name $names -ErrorAction SilentlyContinue | ForEach-Object { $pids[[uint32]$_.Id] = $true }
$foreground = [DockWin32]::GetForegroundWindow()
$windows = foreach ($h in [DockWin32]::TopLevel()) {
    $procId = [uint32]0
    [void][DockWin32]::GetWindowThreadProcessId($h, [ref]$procId)
    if (-not $pids.ContainsKey($procId)) { continue }
    $title = New-Object System.Text.StringBuilder 512
    [void][DockWin32]::GetWindowText($h, $title, 512)
    if ($title.Length -eq 0) { continue }
    $class = New-Object System.Text.StringBuilder 256
    [void][DockWin32]::GetClassName($h, $class, 256)
    $rect = New-Object DockWin32+RECT
    [void][DockWin32]::GetWindowRect($h, [ref]$rect)
    [pscustomobject]@{
        Handle = [string][int64]$h
        Title = $title.ToString()
        ProcessId = [int]$procId
        ClassName = $class.ToString()
        IsActive = ($h -eq $foreground)
        Bounds = [pscustomobject]@{ X = $rect.Left; Y = $rect.Top; Width = $rect.Right - $rect.Left; Height = $rect.Bottom - $rect.Top }
    }
}
ConvertTo-Json -InputObject @($windows) -Compress -Depth 3
"#;

/// Запускает внешнюю утилиту и возвращает stdout.
/// По таймауту процесс убивается (kill_on_drop).
pub async fn run_command(program: &str, args: &[String], timeout: Duration) -> Result<String, ExecError> {
    debug_if_enabled!("Запуск {} {:?} (таймаут {:?})", program, args, timeout);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::ToolNotFound(program.to_string())
        } else {
            ExecError::Spawn(e)
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ExecError::Spawn(e)),
        Err(_) => return Err(ExecError::Timeout(timeout.as_millis() as u64)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ExecError::NonZeroExit {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Список имён процессов в виде литерала PowerShell: `'Dofus','Other'`
pub fn powershell_name_list(process_names: &[String]) -> String {
    process_names
        .iter()
        .map(|name| format!("'{}'", name.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Скрипт перечисления окон пишется на диск один раз за время жизни процесса
pub struct ScriptInstaller {
    dir: PathBuf,
    contents: String,
    path: OnceCell<PathBuf>,
}

impl ScriptInstaller {
    pub fn new(dir: PathBuf, process_names: &[String]) -> Self {
        let contents = ENUM_WINDOWS_SCRIPT.replace(PROCESS_NAMES_PLACEHOLDER, &powershell_name_list(process_names));
        Self {
            dir,
            contents,
            path: OnceCell::new(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.path.initialized()
    }

    pub async fn ensure(&self) -> Result<&Path, ExecError> {
        let path = self
            .path
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.dir).await.map_err(ExecError::Script)?;
                let path = self.dir.join(SCRIPT_FILE_NAME);
                tokio::fs::write(&path, &self.contents).await.map_err(ExecError::Script)?;
                info!("Скрипт перечисления окон записан в {:?}", path);
                Ok::<PathBuf, ExecError>(path)
            })
            .await?;
        Ok(path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_list_escapes_quotes() {
        let names = vec!["Dofus".to_string(), "O'Brien".to_string()];
        assert_eq!(powershell_name_list(&names), "'Dofus','O''Brien'");
    }

    #[tokio::test]
    async fn script_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let installer = ScriptInstaller::new(dir.path().join("scripts"), &["Dofus".to_string()]);
        assert!(!installer.is_installed());

        let first = installer.ensure().await.unwrap().to_path_buf();
        let body = std::fs::read_to_string(&first).unwrap();
        assert!(body.contains("$names = @('Dofus')"));
        assert!(!body.contains(PROCESS_NAMES_PLACEHOLDER));

        // Повторный вызов не переписывает файл
        std::fs::write(&first, "changed").unwrap();
        let second = installer.ensure().await.unwrap().to_path_buf();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "changed");
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let err = run_command("definitely-not-a-real-tool-4242", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ToolNotFound(_)));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_is_captured() {
        let args = vec!["-c".to_string(), "printf '[]'".to_string()];
        let out = run_command("sh", &args, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out, "[]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_transient() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_command("sh", &args, Duration::from_secs(5)).await.unwrap_err();
        match &err {
            ExecError::NonZeroExit { code, stderr } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let started = std::time::Instant::now();
        let err = run_command("sh", &args, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout(100)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
