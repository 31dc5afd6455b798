use reqwest::header::HeaderMap;

#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: bytes::Bytes,
    headers_size: usize,
}

impl Response {
    pub async fn new(res: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        // Header lines plus the status line approximation
        let headers_size = headers
            .iter()
            .map(|(k, v)| k.as_str().len() + v.len() + 4)
            .sum::<usize>()
            + 12;
        let body = res.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
            headers_size,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &bytes::Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns total response size (body + headers + status line approximation)
    pub fn total_size(&self) -> usize {
        self.body.len() + self.headers_size
    }
}
