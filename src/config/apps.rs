//! App name to package name mapping for well-known applications.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Pseudo-package that `open_app` resolves to a HOME key press.
pub const HOME_PACKAGE: &str = "HOME";

/// Mapping from normalized app names to Android package names.
///
/// Keys are lowercase and accent-free; look them up through [`get_package`].
pub static APP_PACKAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Messaging & Social
    m.insert("whatsapp", "com.whatsapp");
    m.insert("instagram", "com.instagram.android");
    m.insert("twitter", "com.twitter.android");
    m.insert("x", "com.twitter.android");
    m.insert("facebook", "com.facebook.katana");
    m.insert("tiktok", "com.zhiliaoapp.musically");
    m.insert("mensajes", "com.google.android.apps.messaging");
    m.insert("messages", "com.google.android.apps.messaging");

    // Google
    m.insert("chrome", "com.android.chrome");
    m.insert("gmail", "com.google.android.gm");
    m.insert("youtube", "com.google.android.youtube");
    m.insert("maps", "com.google.android.apps.maps");
    m.insert("calendar", "com.google.android.calendar");
    m.insert("calendario", "com.google.android.calendar");
    m.insert("play store", "com.android.vending");

    // Media
    m.insert("spotify", "com.spotify.music");
    m.insert("netflix", "com.netflix.mediaclient");
    m.insert("camera", "com.android.camera");
    m.insert("camara", "com.android.camera");
    m.insert("gallery", "com.android.gallery3d");
    m.insert("galeria", "com.sec.android.gallery3d");

    // System
    m.insert("settings", "com.android.settings");
    m.insert("ajustes", "com.android.settings");
    m.insert("configuracion", "com.android.settings");
    m.insert("clock", "com.google.android.deskclock");
    m.insert("reloj", "com.google.android.deskclock");
    m.insert("calculator", "com.google.android.calculator");
    m.insert("calculadora", "com.google.android.calculator");
    m.insert("phone", "com.android.dialer");
    m.insert("telefono", "com.android.dialer");
    m.insert("contacts", "com.android.contacts");
    m.insert("contactos", "com.android.contacts");
    m.insert("home", HOME_PACKAGE);

    m
});

/// Lowercase `text` and strip the common Latin diacritics.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Get the package name for an app by its display name.
pub fn get_package(app_name: &str) -> Option<&'static str> {
    APP_PACKAGES.get(normalize_text(app_name.trim()).as_str()).copied()
}

/// Resolve an `open_app` identifier: known names map to packages, anything
/// else is assumed to already be a package name.
pub fn resolve_package(identifier: &str) -> String {
    get_package(identifier)
        .map(str::to_string)
        .unwrap_or_else(|| identifier.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_package() {
        assert_eq!(get_package("WhatsApp"), Some("com.whatsapp"));
        assert_eq!(get_package("Configuración"), Some("com.android.settings"));
        assert_eq!(get_package("NonExistent"), None);
    }

    #[test]
    fn test_resolve_package_passthrough() {
        assert_eq!(resolve_package("home"), HOME_PACKAGE);
        assert_eq!(resolve_package("org.example.app"), "org.example.app");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Cámara"), "camara");
        assert_eq!(normalize_text("TELÉFONO"), "telefono");
    }
}
