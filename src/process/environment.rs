use std::process::Command;

use super::LaunchSpec;
use crate::core::config::ProxyConfig;

/// Decides which proxy, if any, a child should use for a URL.
pub trait ProxyResolver: Send {
    fn proxy_for(&self, url: &str) -> Option<String>;
}

/// Never proxies.
#[derive(Debug, Default, Clone)]
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn proxy_for(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Resolves from the configured proxy and its host exclusion list.
#[derive(Debug, Clone)]
pub struct ConfigProxyResolver {
    config: ProxyConfig,
}

impl ConfigProxyResolver {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }
}

/// Host part of a network URL, None for local paths and file URLs.
pub fn url_host(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.eq_ignore_ascii_case("file") {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split(']').next()?,
        None => host_port.split(':').next()?,
    };
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

impl ProxyResolver for ConfigProxyResolver {
    fn proxy_for(&self, url: &str) -> Option<String> {
        let proxy = self.config.http_proxy.as_ref().filter(|p| !p.is_empty())?;
        let host = url_host(url)?.to_ascii_lowercase();
        let excluded = self.config.no_proxy.iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.is_empty() {
                return false;
            }
            if entry.starts_with('.') {
                host.ends_with(&entry) || host == entry[1..]
            } else {
                host == entry || host.ends_with(&format!(".{}", entry))
            }
        });
        if excluded {
            None
        } else {
            Some(proxy.clone())
        }
    }
}

/// Variables that make a child think it belongs to the desktop session.
pub const STRIPPED_VARIABLES: &[&str] = &["SESSION_MANAGER"];

/// Builds the OS command for a launch: inherited environment minus the
/// session manager, plus overrides and the resolved proxy.
pub fn build_command(spec: &LaunchSpec, resolver: &dyn ProxyResolver) -> Command {
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    for name in STRIPPED_VARIABLES {
        command.env_remove(name);
    }
    if let Some(proxy) = spec.target_url.as_deref().and_then(|url| resolver.proxy_for(url)) {
        log::debug!("Using proxy {} for {}", proxy, spec.program);
        command.env("http_proxy", proxy);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ConfigProxyResolver {
        ConfigProxyResolver::new(ProxyConfig {
            http_proxy: Some("http://proxy.example:3128".to_string()),
            no_proxy: vec!["localhost".to_string(), ".lan".to_string()],
        })
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("http://example.com/a.ogg"), Some("example.com"));
        assert_eq!(url_host("mms://user@media.example:8080/live"), Some("media.example"));
        assert_eq!(url_host("http://[::1]:80/"), Some("::1"));
        assert_eq!(url_host("file:///tmp/a.avi"), None);
        assert_eq!(url_host("/tmp/a.avi"), None);
    }

    #[test]
    fn test_proxy_for_remote_url() {
        assert_eq!(
            resolver().proxy_for("http://radio.example/stream"),
            Some("http://proxy.example:3128".to_string())
        );
    }

    #[test]
    fn test_no_proxy_entries() {
        let r = resolver();
        assert_eq!(r.proxy_for("http://localhost:8000/x"), None);
        assert_eq!(r.proxy_for("http://nas.lan/movie.mkv"), None);
        assert_eq!(r.proxy_for("/home/user/movie.mkv"), None);
    }

    #[test]
    fn test_unset_proxy() {
        let r = ConfigProxyResolver::new(ProxyConfig::default());
        assert_eq!(r.proxy_for("http://example.com/"), None);
        assert_eq!(NoProxy.proxy_for("http://example.com/"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_command_environment() {
        std::env::set_var("SESSION_MANAGER", "local/host:@/tmp/.ICE-unix/1");
        let spec = LaunchSpec::new("sh")
            .args(["-c", "echo \"$SESSION_MANAGER|$http_proxy|$EXTRA\""])
            .target_url("http://radio.example/stream")
            .env("EXTRA", "yes");
        let output = build_command(&spec, &resolver()).output().unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.trim(), "|http://proxy.example:3128|yes");
    }
}
