//! Device permission checks.
//!
//! Camera, microphone and photo-library access are granted by the operating
//! system. A denial is terminal: the app explains once where to change it in
//! Settings and never re-requests on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Types of device permissions the app may need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionType {
    /// Camera permission (required for photo capture)
    Camera,
    /// Microphone permission (required for audio recording)
    Microphone,
    /// Photo library permission (required to save and browse photos)
    PhotoLibrary,
}

/// Deep link that opens this app's page in Settings.
pub const APP_SETTINGS_URL: &str = "app-settings:";

impl PermissionType {
    /// Get the human-readable name of this permission type
    pub fn name(&self) -> &'static str {
        match self {
            PermissionType::Camera => "Camera",
            PermissionType::Microphone => "Microphone",
            PermissionType::PhotoLibrary => "Photo Library",
        }
    }

    /// Get the Settings path for this permission
    pub fn settings_path(&self) -> &'static str {
        match self {
            PermissionType::Camera => "Settings > Privacy & Security > Camera",
            PermissionType::Microphone => "Settings > Privacy & Security > Microphone",
            PermissionType::PhotoLibrary => "Settings > Privacy & Security > Photos",
        }
    }

    /// Why the app asks for this permission, shown in the authorization prompt
    pub fn usage_message(&self) -> &'static str {
        match self {
            PermissionType::Camera => "Use your camera to photograph your pet",
            PermissionType::Microphone => "Use your microphone to analyze your pet's heartbeat",
            PermissionType::PhotoLibrary => "Save photos and pick earlier shots from your library",
        }
    }
}

/// Authorization state reported by the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Granted,
    Denied,
    /// Blocked by device policy; the user cannot change it either
    Restricted,
}

/// Source of authorization state.
pub trait PermissionProvider: Send + Sync {
    fn status(&self, permission: PermissionType) -> AuthorizationStatus;

    /// Show the system prompt. Returns whether the user allowed access.
    fn request(&self, permission: PermissionType) -> bool;
}

/// Result of a permission check
#[derive(Debug)]
pub struct PermissionCheckResult {
    /// The type of permission checked
    pub permission_type: PermissionType,
    /// Whether the permission is granted
    pub granted: bool,
    /// Additional details or error message
    pub details: Option<String>,
}

impl PermissionCheckResult {
    /// Create a new successful result
    pub fn granted(permission_type: PermissionType) -> Self {
        Self {
            permission_type,
            granted: true,
            details: None,
        }
    }

    /// Create a new denied result with optional details
    pub fn denied(permission_type: PermissionType, details: Option<String>) -> Self {
        Self {
            permission_type,
            granted: false,
            details,
        }
    }
}

/// Error type for permission verification failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionError {
    /// The type of permission that is missing
    pub permission_type: PermissionType,
    /// Additional details about the error
    pub details: Option<String>,
    /// True the first time this permission is reported as denied; the caller
    /// should show the settings-redirect prompt
    pub should_prompt: bool,
}

impl std::fmt::Display for PermissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} permission is required.\n\n\
            Please grant permission in:\n  {}",
            self.permission_type.name(),
            self.permission_type.settings_path(),
        )?;

        if let Some(ref details) = self.details {
            write!(f, "\n\nDetails: {}", details)?;
        }

        Ok(())
    }
}

impl std::error::Error for PermissionError {}

/// Check one permission, requesting it if the user has not decided yet.
pub fn check_permission(
    provider: &dyn PermissionProvider,
    permission: PermissionType,
) -> PermissionCheckResult {
    match provider.status(permission) {
        AuthorizationStatus::Granted => PermissionCheckResult::granted(permission),
        AuthorizationStatus::NotDetermined => {
            log::info!("Requesting {} permission", permission.name());
            if provider.request(permission) {
                PermissionCheckResult::granted(permission)
            } else {
                PermissionCheckResult::denied(
                    permission,
                    Some("Access was declined at the prompt".to_string()),
                )
            }
        }
        AuthorizationStatus::Denied => PermissionCheckResult::denied(permission, None),
        AuthorizationStatus::Restricted => PermissionCheckResult::denied(
            permission,
            Some("Access is restricted on this device".to_string()),
        ),
    }
}

/// Verify a set of permissions.
///
/// Returns a `PermissionError` for every permission that is not granted.
/// Empty vector means all required permissions are granted.
pub fn verify_permissions(
    provider: &dyn PermissionProvider,
    required: &[PermissionType],
) -> Vec<PermissionError> {
    required
        .iter()
        .map(|p| check_permission(provider, *p))
        .filter(|result| !result.granted)
        .map(|result| PermissionError {
            permission_type: result.permission_type,
            details: result.details,
            should_prompt: true,
        })
        .collect()
}

/// Print a user-friendly summary of missing permissions.
pub fn print_permission_errors(errors: &[PermissionError]) {
    if errors.is_empty() {
        return;
    }

    eprintln!("\nMissing permissions detected:\n");

    for (i, error) in errors.iter().enumerate() {
        eprintln!("{}. {}", i + 1, error.permission_type.name());
        eprintln!("   Grant permission in: {}", error.permission_type.settings_path());
        if let Some(ref details) = error.details {
            eprintln!("   Details: {}", details);
        }
        eprintln!();
    }
}

/// Tracks which denials have already been explained to the user.
pub struct PermissionGate<P> {
    provider: P,
    prompted: Mutex<HashSet<PermissionType>>,
}

impl<P: PermissionProvider> PermissionGate<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            prompted: Mutex::new(HashSet::new()),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Succeed if `permission` is granted (requesting it once if undecided).
    ///
    /// A denial is returned as an error every time, but only the first one
    /// for each permission carries `should_prompt`.
    pub fn ensure(&self, permission: PermissionType) -> Result<(), PermissionError> {
        let result = check_permission(&self.provider, permission);
        if result.granted {
            return Ok(());
        }

        let first = self
            .prompted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(permission);
        if first {
            log::warn!(
                "{} permission denied; directing user to {}",
                permission.name(),
                permission.settings_path()
            );
        }
        Err(PermissionError {
            permission_type: permission,
            details: result.details,
            should_prompt: first,
        })
    }
}

/// Provider with fixed answers. Used by the CLI and tests.
#[derive(Debug)]
pub struct StaticPermissions {
    statuses: Mutex<HashMap<PermissionType, AuthorizationStatus>>,
    allow_on_request: bool,
    requests: Mutex<u32>,
}

impl StaticPermissions {
    /// Everything granted.
    pub fn granted_all() -> Self {
        let statuses = [
            PermissionType::Camera,
            PermissionType::Microphone,
            PermissionType::PhotoLibrary,
        ]
        .into_iter()
        .map(|p| (p, AuthorizationStatus::Granted))
        .collect();
        Self {
            statuses: Mutex::new(statuses),
            allow_on_request: true,
            requests: Mutex::new(0),
        }
    }

    /// Everything undecided; prompts answer with `allow`.
    pub fn undecided(allow: bool) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            allow_on_request: allow,
            requests: Mutex::new(0),
        }
    }

    pub fn with(self, permission: PermissionType, status: AuthorizationStatus) -> Self {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(permission, status);
        self
    }

    /// How many times the system prompt was shown.
    pub fn request_count(&self) -> u32 {
        *self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PermissionProvider for StaticPermissions {
    fn status(&self, permission: PermissionType) -> AuthorizationStatus {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&permission)
            .copied()
            .unwrap_or(AuthorizationStatus::NotDetermined)
    }

    fn request(&self, permission: PermissionType) -> bool {
        *self.requests.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let status = if self.allow_on_request {
            AuthorizationStatus::Granted
        } else {
            AuthorizationStatus::Denied
        };
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(permission, status);
        self.allow_on_request
    }
}
