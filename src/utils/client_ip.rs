use actix_web::HttpRequest;
use actix_web::dev::ServiceRequest;

/// Client address used for rate limiting and session records.
///
/// Forwarded headers are only honoured behind a trusted proxy, otherwise any
/// client could pick its own rate-limit key.
pub fn client_ip(req: &HttpRequest, trust_proxy_headers: bool) -> String {
    let info = req.connection_info();
    let ip = if trust_proxy_headers {
        info.realip_remote_addr()
    } else {
        info.peer_addr()
    };
    ip.map(strip_port).unwrap_or("unknown").to_string()
}

pub fn service_client_ip(req: &ServiceRequest, trust_proxy_headers: bool) -> String {
    client_ip(req.request(), trust_proxy_headers)
}

fn strip_port(addr: &str) -> &str {
    // "[::1]:8080" / "1.2.3.4:80" / bare addresses
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn strips_ports_from_v4_and_v6() {
        assert_eq!(strip_port("10.0.0.1:443"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let req = TestRequest::default()
            .peer_addr("10.0.0.9:5000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.5"))
            .to_http_request();
        assert_eq!(client_ip(&req, false), "10.0.0.9");
        assert_eq!(client_ip(&req, true), "203.0.113.5");
    }
}
