//! Backend RPC protocol: one closed request enum per service.
//!
//! Each enum serializes as `{"method": "...", "params": {...}}`, so a request
//! can only be built with the parameters its method takes. Responses are
//! plain data structs deserialized from the envelope's `data` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ServiceName;
use crate::process::manifest::Manifest;
use crate::security::User;
use crate::vfs::node::DirEntry;

/// A request that belongs to exactly one backend service.
pub trait ServiceRequest: Serialize + Send + Sync {
    const SERVICE: ServiceName;

    fn method(&self) -> &'static str;

    /// Reachable without an authenticated session.
    fn is_public(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AuthRequest {
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
        display_name: String,
    },
    ValidateToken {
        token: String,
    },
    Logout {
        token: String,
    },
}

impl ServiceRequest for AuthRequest {
    const SERVICE: ServiceName = ServiceName::Auth;

    fn method(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Register { .. } => "register",
            Self::ValidateToken { .. } => "validateToken",
            Self::Logout { .. } => "logout",
        }
    }

    fn is_public(&self) -> bool {
        !matches!(self, Self::Logout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum UsersRequest {
    ListUsers,
    GetUserDetails {
        username: String,
    },
    UpdateUser {
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        roles: Option<Vec<String>>,
    },
    DeleteUser {
        username: String,
    },
    SetPassword {
        username: String,
        password: String,
    },
}

impl ServiceRequest for UsersRequest {
    const SERVICE: ServiceName = ServiceName::Users;

    fn method(&self) -> &'static str {
        match self {
            Self::ListUsers => "listUsers",
            Self::GetUserDetails { .. } => "getUserDetails",
            Self::UpdateUser { .. } => "updateUser",
            Self::DeleteUser { .. } => "deleteUser",
            Self::SetPassword { .. } => "setPassword",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum FilesystemRequest {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    DeleteFile { path: String },
    ListDirectory { path: String },
    CreateDirectory { path: String },
}

impl ServiceRequest for FilesystemRequest {
    const SERVICE: ServiceName = ServiceName::Filesystem;

    fn method(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "readFile",
            Self::WriteFile { .. } => "writeFile",
            Self::DeleteFile { .. } => "deleteFile",
            Self::ListDirectory { .. } => "listDirectory",
            Self::CreateDirectory { .. } => "createDirectory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AppsRequest {
    ListApps,
    GetAppInfo {
        app_id: String,
    },
    GetAppAsset {
        app_id: String,
        file: String,
    },
    SubmitApp {
        manifest: Manifest,
    },
    ListSubmissions,
    ApproveSubmission {
        submission_id: String,
    },
    RejectSubmission {
        submission_id: String,
        reason: String,
    },
}

impl ServiceRequest for AppsRequest {
    const SERVICE: ServiceName = ServiceName::Apps;

    fn method(&self) -> &'static str {
        match self {
            Self::ListApps => "listApps",
            Self::GetAppInfo { .. } => "getAppInfo",
            Self::GetAppAsset { .. } => "getAppAsset",
            Self::SubmitApp { .. } => "submitApp",
            Self::ListSubmissions => "listSubmissions",
            Self::ApproveSubmission { .. } => "approveSubmission",
            Self::RejectSubmission { .. } => "rejectSubmission",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SystemRequest {
    GetSystemInfo,
    GetLanguagePack { language: String },
    RunSelfTests,
    LogError { message: String, context: Value },
}

impl ServiceRequest for SystemRequest {
    const SERVICE: ServiceName = ServiceName::System;

    fn method(&self) -> &'static str {
        match self {
            Self::GetSystemInfo => "getSystemInfo",
            Self::GetLanguagePack { .. } => "getLanguagePack",
            Self::RunSelfTests => "runSelfTests",
            Self::LogError { .. } => "logError",
        }
    }

    fn is_public(&self) -> bool {
        matches!(self, Self::GetSystemInfo | Self::GetLanguagePack { .. })
    }
}

/// Response envelope: `{success, data | message}`.
///
/// A failed response may carry a machine-readable `code` (`notFound`,
/// `conflict`, `permissionDenied`) next to its message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RpcResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            message: None,
            code: None,
            request_id: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            message: Some(message.into()),
            code: None,
            request_id: None,
        }
    }

    pub fn fail_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::fail(message)
        }
    }
}

/// `auth.login` / `auth.validateToken` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn ready_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "ready_by_default")]
    pub ready: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagePack {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub strings: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub content: String,
}

/// Raw bytes of an application asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppAsset {
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub manifest: Manifest,
    #[serde(default)]
    pub status: String,
}

/// Typed view over `apps.listApps`.
pub type AppList = Vec<Manifest>;

/// Typed view over `filesystem.listDirectory`.
pub type DirectoryListing = Vec<DirEntry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_method_and_params() {
        let req = AuthRequest::Login {
            username: "alice".into(),
            password: "pw".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["method"], "login");
        assert_eq!(v["params"]["username"], "alice");
        assert_eq!(req.method(), "login");
    }

    #[test]
    fn params_use_camel_case() {
        let req = AppsRequest::GetAppAsset {
            app_id: "hello".into(),
            file: "main.wasm".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["method"], "getAppAsset");
        assert_eq!(v["params"]["appId"], "hello");
    }

    #[test]
    fn method_names_match_serialized_tag() {
        let samples: Vec<(Value, &str)> = vec![
            (
                serde_json::to_value(SystemRequest::GetSystemInfo).unwrap(),
                SystemRequest::GetSystemInfo.method(),
            ),
            (
                serde_json::to_value(UsersRequest::ListUsers).unwrap(),
                UsersRequest::ListUsers.method(),
            ),
            (
                serde_json::to_value(FilesystemRequest::ListDirectory { path: "/".into() })
                    .unwrap(),
                "listDirectory",
            ),
        ];
        for (value, method) in samples {
            assert_eq!(value["method"], method);
        }
    }

    #[test]
    fn public_methods() {
        assert!(AuthRequest::ValidateToken { token: "t".into() }.is_public());
        assert!(!AuthRequest::Logout { token: "t".into() }.is_public());
        assert!(SystemRequest::GetSystemInfo.is_public());
        assert!(SystemRequest::GetLanguagePack { language: "en".into() }.is_public());
        assert!(!SystemRequest::RunSelfTests.is_public());
        assert!(!FilesystemRequest::ReadFile { path: "/".into() }.is_public());
        assert!(!AppsRequest::ListApps.is_public());
    }

    #[test]
    fn auth_session_accepts_name_alias() {
        let session: AuthSession = serde_json::from_value(json!({
            "token": "abc",
            "user": {"username": "bob", "name": "Bob", "roles": ["user"]},
            "permissions": ["app.launch.*"]
        }))
        .unwrap();
        assert_eq!(session.user.display_name, "Bob");
        assert_eq!(session.permissions.len(), 1);
    }

    #[test]
    fn system_info_ready_defaults_true() {
        let info: SystemInfo = serde_json::from_value(json!({"version": "1.0"})).unwrap();
        assert!(info.ready);
    }
}
