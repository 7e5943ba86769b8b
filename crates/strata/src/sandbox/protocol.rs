//! Line protocol between the host and the interpreter loop
//!
//! The host writes one JSON request per line to stdin. The interpreter
//! answers with one JSON message per line on its real stdout; user output is
//! captured and returned inside the message.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Interpreter loop started inside the sandbox.
///
/// Globals persist across requests. Figures left open by user code are
/// returned as base64 PNG artifacts and then closed.
pub const BOOTSTRAP: &str = r#"
import base64, contextlib, io, json, sys, time, traceback

_reply_stream = sys.stdout
_namespace = {"__name__": "__sandbox__"}

try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt
    _namespace["plt"] = plt
except Exception:
    plt = None

for _module, _alias in (("numpy", "np"), ("pandas", "pd")):
    try:
        _namespace[_alias] = __import__(_module)
    except Exception:
        pass


def _reply(payload):
    _reply_stream.write(json.dumps(payload) + "\n")
    _reply_stream.flush()


def _collect_figures():
    if plt is None:
        return []
    figures = []
    try:
        for number in plt.get_fignums():
            buffer = io.BytesIO()
            plt.figure(number).savefig(buffer, format="png", bbox_inches="tight")
            figures.append({
                "name": "figure_%d.png" % number,
                "mime": "image/png",
                "data": base64.b64encode(buffer.getvalue()).decode("ascii"),
            })
    finally:
        plt.close("all")
    return figures


_reply({"type": "ready"})

for _line in sys.stdin:
    _line = _line.strip()
    if not _line:
        continue
    try:
        _request = json.loads(_line)
    except Exception as exc:
        _reply({"type": "error", "message": "bad request: %s" % exc})
        continue

    _stdout, _stderr = io.StringIO(), io.StringIO()
    _error = None
    _started = time.time()
    with contextlib.redirect_stdout(_stdout), contextlib.redirect_stderr(_stderr):
        try:
            exec(compile(_request.get("code", ""), "<sandbox>", "exec"), _namespace)
        except BaseException:
            _error = traceback.format_exc()
    try:
        _artifacts = _collect_figures()
    except Exception:
        _artifacts = []
        _error = (_error or "") + traceback.format_exc()
    _reply({
        "type": "result",
        "id": _request.get("id"),
        "stdout": _stdout.getvalue(),
        "stderr": _stderr.getvalue(),
        "error": _error,
        "artifacts": _artifacts,
        "elapsed_ms": int((time.time() - _started) * 1000),
    })
"#;

/// Host to sandbox
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest<'a> {
    pub id: u64,
    pub code: &'a str,
}

impl ExecuteRequest<'_> {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Encoded artifact as sent by the interpreter
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireArtifact {
    pub name: String,
    pub mime: String,
    pub data: String,
}

/// Sandbox to host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxMessage {
    Ready,
    Result {
        id: Option<u64>,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        artifacts: Vec<WireArtifact>,
        #[serde(default)]
        elapsed_ms: u64,
    },
    Error {
        message: String,
    },
}

impl SandboxMessage {
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

/// Decoded artifact bytes
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl WireArtifact {
    pub fn decode(&self) -> Option<RenderedArtifact> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .ok()?;
        Some(RenderedArtifact {
            name: self.name.clone(),
            mime: self.mime.clone(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_one_json_line() {
        let line = ExecuteRequest {
            id: 7,
            code: "print('a')\nprint('b')",
        }
        .to_line()
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            SandboxMessage::parse(r#"{"type":"ready"}"#),
            Some(SandboxMessage::Ready)
        );

        let message = SandboxMessage::parse(
            r#"{"type":"result","id":3,"stdout":"4\n","stderr":"","error":null,"artifacts":[{"name":"figure_1.png","mime":"image/png","data":"iVBORw0K"}],"elapsed_ms":5}"#,
        )
        .unwrap();
        let SandboxMessage::Result { id, stdout, artifacts, .. } = message else {
            panic!("expected result");
        };
        assert_eq!(id, Some(3));
        assert_eq!(stdout, "4\n");
        let decoded = artifacts[0].decode().unwrap();
        assert_eq!(&decoded.data[..4], &[0x89, b'P', b'N', b'G']);

        assert!(SandboxMessage::parse("Traceback (most recent call last):").is_none());
    }
}
