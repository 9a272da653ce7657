use std::path::PathBuf;

/// User agent sent with every upstream request.
pub const USER_AGENT: &str = "pipita-portal/1.0 (+https://nico.com.ar)";

pub const PROC_UPTIME: &str = "/proc/uptime";
pub const THERMAL_ZONE_TEMP: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Default cache directory when the build is not given one.
pub fn cache_dir() -> PathBuf {
    // On Linux this is ~/.cache/portal; the XDG variable wins when set
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("portal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_dir_is_namespaced() {
        assert!(cache_dir().ends_with("portal"));
    }
}
