// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    env,
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process;

use crate::{error::Result, key::Identity};

/// Setting `BROWSER` to this value turns off automatic browser launching.
pub const PRINT_ONLY_BROWSER: &str = "echo";

#[derive(Debug, Clone)]
pub struct Request {
    identity: Identity,
    login_url: String,
}

impl Request {
    pub fn new(identity: Identity, login_url: String) -> Self {
        Self {
            identity,
            login_url,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

/// Shows the operator where to approve a newly registered key.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Returns `false` if this presenter could not reach the operator, so
    /// that another one can be tried.
    async fn present(&self, req: &Request) -> Result<bool>;
}

#[async_trait]
impl<T: Presenter + ?Sized> Presenter for Box<T> {
    async fn present(&self, req: &Request) -> Result<bool> {
        (**self).present(req).await
    }
}

#[async_trait]
impl<T: Presenter> Presenter for Vec<T> {
    async fn present(&self, req: &Request) -> Result<bool> {
        for candidate in self {
            if candidate.present(req).await? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

pub struct BrowserPresenter {
    executable: Option<OsString>,
}

impl BrowserPresenter {
    pub const fn new() -> Self {
        Self { executable: None }
    }

    pub fn new_with_executable<P: AsRef<Path>>(executable: P) -> Self {
        Self {
            executable: Some(executable.as_ref().as_os_str().into()),
        }
    }

    fn default_executable() -> &'static OsStr {
        OsStr::new(if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        })
    }
}

#[async_trait]
impl Presenter for BrowserPresenter {
    async fn present(&self, req: &Request) -> Result<bool> {
        let executable = match self.executable {
            Some(ref executable) => executable.as_os_str(),
            None => Self::default_executable(),
        };
        debug!("Opening {} with {:?}", req.login_url(), executable);

        let status = process::Command::new(executable)
            .arg(req.login_url())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => Ok(true),
            Ok(status) => {
                warn!("Browser exited unsuccessfully ({})", status);
                Ok(false)
            }
            Err(e) => {
                warn!("Could not launch a browser: {}", e);
                Ok(false)
            }
        }
    }
}

pub struct PrintPresenter;

#[async_trait]
impl Presenter for PrintPresenter {
    async fn present(&self, req: &Request) -> Result<bool> {
        eprintln!(
            "Please visit this page to authenticate {}: {}",
            req.identity(),
            req.login_url()
        );
        Ok(true)
    }
}

/// How the approval page is shown, as chosen by `BROWSER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    /// Only print the page's address.
    PrintOnly,
    /// Open the page in the named browser, or the platform's default one,
    /// and print the address if that fails.
    Browser(Option<OsString>),
}

impl Presentation {
    /// `BROWSER=echo` asks for printing only. Any other non-empty value names
    /// the browser to run.
    pub fn from_browser(browser: Option<OsString>) -> Self {
        match browser {
            Some(browser) if browser == PRINT_ONLY_BROWSER => Self::PrintOnly,
            Some(browser) if !browser.is_empty() => Self::Browser(Some(browser)),
            Some(_) | None => Self::Browser(None),
        }
    }

    pub fn from_env() -> Self {
        Self::from_browser(env::var_os("BROWSER"))
    }

    pub fn presenters(self) -> Vec<Box<dyn Presenter>> {
        match self {
            Self::PrintOnly => vec![Box::new(PrintPresenter)],
            Self::Browser(executable) => vec![
                Box::new(match executable {
                    Some(executable) => BrowserPresenter::new_with_executable(executable),
                    None => BrowserPresenter::new(),
                }),
                Box::new(PrintPresenter),
            ],
        }
    }
}

pub fn from_env() -> Vec<Box<dyn Presenter>> {
    Presentation::from_env().presenters()
}
