// Copyright 2025 Oxide Computer Company

//! Facts about the caller and the serving endpoint derived from a request:
//! the client's platform and browser (from `user-agent`), its address, and
//! the host and port it addressed.

use crate::handler::RequestContext;
use http::header;
use regex::Regex;
use std::net::IpAddr;
use std::net::SocketAddr;

/// Returns capture group `group` of `pattern` in `text`, with underscores
/// turned into dots (iOS writes versions as "17_4").
fn version(pattern: &str, text: &str, group: usize) -> Option<String> {
    let captures = Regex::new(pattern).ok()?.captures(text)?;
    let version = captures.get(group)?.as_str().replace('_', ".");
    Some(version).filter(|v| !v.is_empty())
}

fn with_version(platform: &str, version: Option<String>) -> String {
    match version {
        Some(version) => format!("{} {}", platform, version),
        None => platform.to_string(),
    }
}

fn platform(user_agent: &str) -> String {
    if user_agent.to_ascii_lowercase().contains("mobile") {
        return "mobile".to_string();
    }

    if user_agent.contains("like Mac OS X") {
        let ios = version(
            r"CPU( iPhone)? OS ([0-9._]+) like Mac OS X",
            user_agent,
            2,
        );
        return if user_agent.contains("iPhone") {
            with_version("iphone", ios)
        } else if user_agent.contains("iPad") {
            with_version("ipad", ios)
        } else {
            with_version("macosx", ios)
        };
    }

    if user_agent.contains("Android") {
        let android = version(r"Android ([0-9.]+)[);]", user_agent, 1);
        return with_version("android", android);
    }

    if user_agent.contains("webOS/") {
        let webos = version(r"webOS/([0-9.]+)[);]", user_agent, 1);
        return with_version("webos", webos);
    }

    if Regex::new(r"(Intel|PPC) Mac OS X")
        .map(|re| re.is_match(user_agent))
        .unwrap_or(false)
    {
        let mac =
            version(r"(Intel|PPC) Mac OS X ?([0-9._]*)[);]", user_agent, 2);
        return with_version("mac", mac);
    }

    if user_agent.contains("Windows NT") {
        return match version(r"Windows NT ([0-9._]+)[);]", user_agent, 1) {
            Some(windows) => format!("windows {}", windows),
            None => "unknown".to_string(),
        };
    }

    "unknown".to_string()
}

fn browser(user_agent: &str) -> String {
    let lowered = user_agent.to_ascii_lowercase();
    for browser in ["chrome", "msie", "firefox", "safari"] {
        if lowered.contains(browser) {
            return browser.to_string();
        }
    }
    if user_agent.is_empty() {
        "unknown".to_string()
    } else {
        user_agent.to_string()
    }
}

/// Splits a `host` header value into host name and port.  Bracketed IPv6
/// literals lose their brackets.
fn split_host(authority: &str) -> (&str, Option<u16>) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            (host, port.parse().ok())
        }
        _ => (authority, None),
    }
}

/// Parses one `x-forwarded-for` entry, which may carry a port.
fn forwarded_ip(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

impl RequestContext {
    fn user_agent(&self) -> &str {
        self.header(header::USER_AGENT.as_str()).unwrap_or_default()
    }

    fn authority(&self) -> Option<&str> {
        self.header(header::HOST.as_str())
            .or_else(|| self.request.uri().authority().map(|a| a.as_str()))
            .filter(|a| !a.is_empty())
    }

    /// Returns the caller's platform and version, e.g. "iphone 17.4" or
    /// "windows 10.0".  Detected platforms are "mobile", "iphone", "ipad",
    /// "macosx", "android", "webos", "mac" and "windows"; anything else is
    /// "unknown".
    pub fn detect_platform(&self) -> String {
        platform(self.user_agent())
    }

    /// Returns "chrome", "msie", "firefox" or "safari".  Other agents are
    /// reported verbatim, and a missing one as "unknown".
    pub fn detect_browser(&self) -> String {
        browser(self.user_agent())
    }

    /// Returns the caller's IP address, without a port.  The first
    /// `x-forwarded-for` entry wins over the socket's peer address.
    pub fn detect_address(&self) -> IpAddr {
        self.header("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .and_then(forwarded_ip)
            .unwrap_or_else(|| self.request.remote_addr().ip())
    }

    /// Returns the host name the caller addressed, falling back to the IP of
    /// the accepting socket.
    pub fn detect_server_host(&self) -> String {
        match self.authority().map(split_host) {
            Some((host, _)) if !host.is_empty() => host.to_string(),
            _ => self.request.local_addr().ip().to_string(),
        }
    }

    /// Returns the port the caller addressed, falling back to the port of
    /// the accepting socket.
    pub fn detect_server_port(&self) -> u16 {
        self.authority()
            .and_then(|authority| split_host(authority).1)
            .unwrap_or_else(|| self.request.local_addr().port())
    }
}
