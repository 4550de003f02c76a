wit_bindgen::generate!({
    path: "../../wit",
    world: "app",
});

use serde_json::{json, Value};

struct HelloApp;

const GREETING_REQUEST: &str = "write-greeting";

impl Guest for HelloApp {
    fn dispatch(input: String) -> String {
        let envelope: Value = match serde_json::from_str(&input) {
            Ok(v) => v,
            Err(e) => return json!([{"type": "log", "message": format!("bad envelope: {e}")}]).to_string(),
        };
        let surface = &envelope["surface"];
        let message = &envelope["message"];

        let replies = match message["type"].as_str() {
            Some("initialize") => {
                let name = surface["user"]["name"].as_str().unwrap_or("there");
                let user = surface["user"]["username"].as_str().unwrap_or_default();
                json!([
                    {"type": "setTitle", "title": format!("Hello, {name}")},
                    {"type": "publish", "topic": "app:hello:started", "payload": {"user": user}},
                    {
                        "type": "writeFile",
                        "requestId": GREETING_REQUEST,
                        "path": format!("/users/{user}/Desktop/hello.txt"),
                        "content": format!("Hello, {name}!\n")
                    }
                ])
            }
            Some("reply") if message["requestId"] == GREETING_REQUEST => {
                if message["ok"].as_bool() == Some(true) {
                    json!([
                        {"type": "notify", "level": "success", "title": "Hello", "message": "Left a note on your desktop"},
                        {"type": "ready"}
                    ])
                } else {
                    let error = message["error"].as_str().unwrap_or("unknown error");
                    json!([
                        {"type": "notify", "level": "error", "title": "Hello", "message": error},
                        {"type": "ready"}
                    ])
                }
            }
            _ => json!([]),
        };
        replies.to_string()
    }
}

export!(HelloApp);
