// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::env::consts;

use directories::ProjectDirs;
use inflector::Inflector;
use once_cell::sync::Lazy;

pub static CLIENT_NAME: Lazy<String> =
    Lazy::new(|| option_env!("CARGO_PKG_NAME").unwrap_or("gatekey").to_owned());
pub static CLIENT_VERSION: Lazy<String> =
    Lazy::new(|| option_env!("CARGO_PKG_VERSION").unwrap_or("0.0.0").to_owned());
pub static CLIENT_DISPLAY_NAME: Lazy<String> = Lazy::new(|| CLIENT_NAME.to_title_case());

/// Attached to every generated key so that the server and the operator can
/// tell which client and platform registered it.
pub static CLIENT_COMMENT: Lazy<String> = Lazy::new(|| {
    format!(
        "{} {} ({}/{})",
        *CLIENT_NAME,
        *CLIENT_VERSION,
        consts::OS,
        consts::ARCH
    )
});

pub(crate) static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("com", "NoahFontes", &CLIENT_DISPLAY_NAME));
