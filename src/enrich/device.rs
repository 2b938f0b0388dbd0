use std::fmt;
use woothee::parser::Parser;

/// Device class recorded with each click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Bot => "bot",
            DeviceClass::Unknown => super::UNKNOWN,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a User-Agent with woothee. Missing or unparseable agents are `Unknown`.
pub fn classify_device(user_agent: Option<&str>) -> DeviceClass {
    let ua = match user_agent.map(str::trim) {
        Some(ua) if !ua.is_empty() => ua,
        _ => return DeviceClass::Unknown,
    };

    let Some(result) = Parser::new().parse(ua) else {
        return DeviceClass::Unknown;
    };

    match &*result.category {
        "pc" => DeviceClass::Desktop,
        // woothee files tablets under smartphone
        "smartphone" if ua.contains("iPad") || ua.contains("Tablet") => DeviceClass::Tablet,
        "smartphone" | "mobilephone" => DeviceClass::Mobile,
        "crawler" => DeviceClass::Bot,
        _ => DeviceClass::Unknown,
    }
}
