//! User-facing notices (toasts) and their localized strings.

use crate::dream::error::{ConflictKind, ErrorKind, QuotaReason, SdkError};
use serde::{Deserialize, Serialize};
use tracing::error;

/// UI language. Also sent to the analysis webhook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    /// Unknown codes fall back to English.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "es" => Language::Es,
            _ => Language::En,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToastLevel {
    Success,
    Info,
    Error,
}

/// Follow-up the UI should offer alongside the toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToastAction {
    OpenPricing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub action: Option<ToastAction>,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Success,
            message: message.into(),
            action: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Info,
            message: message.into(),
            action: None,
        }
    }

    /// Build the notice for a failed operation.
    ///
    /// Authentication, authorization and transport failures get a generic
    /// message; the raw detail only goes to the log.
    pub fn from_error(err: &anyhow::Error, lang: Language) -> Self {
        let sdk = err.chain().find_map(|c| c.downcast_ref::<SdkError>());
        let kind = ErrorKind::of(err);
        if matches!(kind, ErrorKind::Unauthorized | ErrorKind::Network | ErrorKind::Decode | ErrorKind::Storage) {
            error!("[Notice] operation failed ({:?}): {:#}", kind, err);
        }

        let (message, action) = match sdk {
            Some(SdkError::Validation(msg)) => (msg.clone(), None),
            Some(SdkError::Quota(reason)) => (quota_text(*reason, lang).to_string(), Some(ToastAction::OpenPricing)),
            Some(SdkError::Conflict { kind, .. }) => (conflict_text(*kind, lang).to_string(), None),
            Some(SdkError::NotFound(_)) => (text(lang, "Not found.", "No encontrado.").to_string(), None),
            Some(SdkError::Unauthorized { .. }) => (
                text(
                    lang,
                    "You don't have permission to do that.",
                    "No tienes permiso para hacer eso.",
                )
                .to_string(),
                None,
            ),
            _ => (
                text(
                    lang,
                    "Something went wrong. Please try again.",
                    "Algo salió mal. Inténtalo de nuevo.",
                )
                .to_string(),
                None,
            ),
        };

        Self {
            level: ToastLevel::Error,
            message,
            action,
        }
    }
}

fn text(lang: Language, en: &'static str, es: &'static str) -> &'static str {
    match lang {
        Language::En => en,
        Language::Es => es,
    }
}

fn quota_text(reason: QuotaReason, lang: Language) -> &'static str {
    match reason {
        QuotaReason::DailyLimitReached => text(
            lang,
            "You've reached today's analysis limit. Upgrade for more.",
            "Has alcanzado el límite diario de análisis. Mejora tu plan para más.",
        ),
        QuotaReason::VisualLimitReached => text(
            lang,
            "You've used all visual analyses in your plan. Upgrade for more.",
            "Has usado todos los análisis visuales de tu plan. Mejora tu plan para más.",
        ),
        QuotaReason::TrialExpired => text(
            lang,
            "Your trial has ended. Choose a plan to continue.",
            "Tu prueba ha terminado. Elige un plan para continuar.",
        ),
        QuotaReason::PlanInsufficient => text(
            lang,
            "This feature needs a higher plan.",
            "Esta función requiere un plan superior.",
        ),
    }
}

fn conflict_text(kind: ConflictKind, lang: Language) -> &'static str {
    match kind {
        ConflictKind::UsernameTaken => text(lang, "That username is taken.", "Ese nombre de usuario ya existe."),
        ConflictKind::DuplicateReport => text(
            lang,
            "You have already reported this.",
            "Ya has reportado esto.",
        ),
        ConflictKind::TrialAlreadyUsed => text(
            lang,
            "The free trial has already been used.",
            "La prueba gratuita ya fue utilizada.",
        ),
        ConflictKind::Other => text(lang, "This already exists.", "Esto ya existe."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_point_to_pricing() {
        let err: anyhow::Error = SdkError::Quota(QuotaReason::TrialExpired).into();
        let toast = Toast::from_error(&err, Language::En);
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(toast.action, Some(ToastAction::OpenPricing));
        assert!(toast.message.contains("trial"));
    }

    #[test]
    fn authorization_detail_is_not_leaked() {
        let err: anyhow::Error = SdkError::Unauthorized {
            code: "42501".into(),
            detail: "new row violates row-level security policy for table \"dreams\"".into(),
        }
        .into();
        let toast = Toast::from_error(&err, Language::Es);
        assert!(!toast.message.contains("42501"));
        assert!(!toast.message.contains("dreams"));
        assert_eq!(toast.message, "No tienes permiso para hacer eso.");
    }

    #[test]
    fn validation_message_is_shown_verbatim() {
        let err: anyhow::Error = SdkError::validation("Username must be 3-20 characters").into();
        let toast = Toast::from_error(&err, Language::En);
        assert_eq!(toast.message, "Username must be 3-20 characters");
        assert_eq!(toast.action, None);
    }

    #[test]
    fn language_codes_round_trip_with_fallback() {
        assert_eq!(Language::from_code("ES"), Language::Es);
        assert_eq!(Language::from_code("tr"), Language::En);
        assert_eq!(Language::Es.code(), "es");
    }
}
