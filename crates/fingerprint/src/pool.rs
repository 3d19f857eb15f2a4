use common::{ClientType, RandomSource};

/// One candidate device for a given client type.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub model: &'static str,
    pub system_version: &'static str,
    pub app_version: &'static str,
}

const ANDROID_DEVICES: &[Device] = &[
    Device { model: "Samsung SM-G991B", system_version: "13", app_version: "10.9.2" },
    Device { model: "Xiaomi 2201116SG", system_version: "12", app_version: "10.8.0" },
    Device { model: "Google Pixel 7", system_version: "14", app_version: "10.9.2" },
    Device { model: "OnePlus CPH2449", system_version: "13", app_version: "10.7.4" },
];

const IOS_DEVICES: &[Device] = &[
    Device { model: "iPhone14,5", system_version: "17.4", app_version: "10.9" },
    Device { model: "iPhone13,2", system_version: "16.6", app_version: "10.8" },
    Device { model: "iPhone15,3", system_version: "17.5", app_version: "10.9" },
];

const DESKTOP_DEVICES: &[Device] = &[
    Device { model: "Desktop", system_version: "Windows 10", app_version: "4.16.8" },
    Device { model: "Desktop", system_version: "macOS 14.4", app_version: "4.16.8" },
];

/// `(language_code, system_language_code, plausible UTC offsets)`.
const LANGUAGE_TABLE: &[(&str, &str, &[i32])] = &[
    ("en", "en-US", &[-8, -5, 0]),
    ("ja", "ja-JP", &[9]),
    ("es", "es-ES", &[-6, -3, 1]),
    ("de", "de-DE", &[1]),
    ("fr", "fr-FR", &[1]),
    ("pt", "pt-BR", &[-3, 1]),
    ("ru", "ru-RU", &[3]),
];

pub const DEFAULT_LAYER: u32 = 181;

/// Pick a client type with a realistic ~60/30/10 android/ios/desktop split.
pub fn sample_client_type(rng: &dyn RandomSource) -> ClientType {
    let roll = rng.uniform(0.0, 1.0);
    if roll < 0.6 {
        ClientType::Android
    } else if roll < 0.9 {
        ClientType::Ios
    } else {
        ClientType::Desktop
    }
}

pub fn sample_device(client_type: ClientType, rng: &dyn RandomSource) -> Device {
    let pool = match client_type {
        ClientType::Android => ANDROID_DEVICES,
        ClientType::Ios => IOS_DEVICES,
        ClientType::Desktop => DESKTOP_DEVICES,
    };
    pool[rng.index(pool.len())]
}

/// Jointly sample a language and a plausible timezone offset for it, so a
/// Japanese-language account is plausibly on UTC+9 rather than UTC-8.
pub fn sample_language_and_offset(rng: &dyn RandomSource) -> (&'static str, &'static str, i32) {
    let (lang, sys_lang, offsets) = LANGUAGE_TABLE[rng.index(LANGUAGE_TABLE.len())];
    let offset = offsets[rng.index(offsets.len())];
    (lang, sys_lang, offset)
}
