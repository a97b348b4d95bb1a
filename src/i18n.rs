//! User-visible strings for failures and local rejections.

use crate::error::FailureClass;
use crate::quota::QuotaRejection;

/// Localisation collaborator.
pub trait Translator: Send + Sync {
    /// Text written into an assistant message that ended in `class`.
    fn localize(&self, class: FailureClass, locale: &str) -> String;

    /// Hint shown when the gate refuses a send.
    fn rejection(&self, rejection: &QuotaRejection, locale: &str) -> String {
        let _ = locale;
        rejection.to_string()
    }
}

/// Built-in English and Spanish tables. Unknown locales fall back to English.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTranslator;

#[derive(Clone, Copy)]
enum Lang {
    En,
    Es,
}

fn lang(locale: &str) -> Lang {
    let primary = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match primary.as_str() {
        "es" => Lang::Es,
        _ => Lang::En,
    }
}

impl Translator for StaticTranslator {
    fn localize(&self, class: FailureClass, locale: &str) -> String {
        let text = match (lang(locale), class) {
            (Lang::En, FailureClass::UserCancelled) => "Reply stopped.",
            (Lang::En, FailureClass::RateLimited) => {
                "The service is busy right now. Please try again in a moment."
            }
            (Lang::En, FailureClass::Timeout) => "The reply took too long. Please try again.",
            (Lang::En, FailureClass::NetworkUnavailable) => {
                "You appear to be offline. Check your connection and try again."
            }
            (Lang::En, FailureClass::ProtocolError) => {
                "The reply could not be completed. Please try again."
            }
            (Lang::En, FailureClass::Generic) => "Something went wrong. Please try again.",
            (Lang::Es, FailureClass::UserCancelled) => "Respuesta detenida.",
            (Lang::Es, FailureClass::RateLimited) => {
                "El servicio está ocupado. Inténtalo de nuevo en un momento."
            }
            (Lang::Es, FailureClass::Timeout) => {
                "La respuesta tardó demasiado. Inténtalo de nuevo."
            }
            (Lang::Es, FailureClass::NetworkUnavailable) => {
                "Parece que no tienes conexión. Revísala e inténtalo de nuevo."
            }
            (Lang::Es, FailureClass::ProtocolError) => {
                "No se pudo completar la respuesta. Inténtalo de nuevo."
            }
            (Lang::Es, FailureClass::Generic) => "Algo salió mal. Inténtalo de nuevo.",
        };
        text.to_string()
    }

    fn rejection(&self, rejection: &QuotaRejection, locale: &str) -> String {
        match (lang(locale), rejection) {
            (Lang::En, QuotaRejection::Busy) => "Please wait for the current reply to finish.".into(),
            (Lang::En, QuotaRejection::UpgradeRequired { max, .. }) => {
                format!("You've used all {max} messages for today. Upgrade for more.")
            }
            (Lang::En, QuotaRejection::Throttled { .. }) => {
                "You're sending messages too quickly. Slow down a little.".into()
            }
            (Lang::En, QuotaRejection::InputTooLong { max, .. }) => {
                format!("Your message is too long (max {max} characters).")
            }
            (Lang::En, QuotaRejection::EmptyInput) => "Type a message first.".into(),
            (Lang::Es, QuotaRejection::Busy) => "Espera a que termine la respuesta actual.".into(),
            (Lang::Es, QuotaRejection::UpgradeRequired { max, .. }) => {
                format!("Has usado tus {max} mensajes de hoy. Mejora tu plan para más.")
            }
            (Lang::Es, QuotaRejection::Throttled { .. }) => {
                "Estás enviando mensajes demasiado rápido.".into()
            }
            (Lang::Es, QuotaRejection::InputTooLong { max, .. }) => {
                format!("Tu mensaje es demasiado largo (máximo {max} caracteres).")
            }
            (Lang::Es, QuotaRejection::EmptyInput) => "Escribe un mensaje primero.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_subtags_and_unknown_locales() {
        let t = StaticTranslator;
        assert_eq!(t.localize(FailureClass::UserCancelled, "es-MX"), "Respuesta detenida.");
        assert_eq!(t.localize(FailureClass::UserCancelled, "xx"), "Reply stopped.");
    }

    #[test]
    fn rejection_hints_carry_limits() {
        let hint = StaticTranslator.rejection(&QuotaRejection::InputTooLong { len: 9, max: 5 }, "en");
        assert!(hint.contains("max 5"));
    }
}
