use std::path::{Path, PathBuf};

use chunkscope::{
    DataDir,
    Engine,
    api::{IndexRequest, NamedText},
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(data_dir))?;
    let engine = Engine::open(&data_dir, None)?;
    engine.index(&IndexRequest::new(vec![
        NamedText::new(
            "hello.md",
            "Hello world. The second sentence talks about weather.",
        ),
        NamedText::new("other.md", "Completely unrelated cooking notes."),
    ]))?;
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = chunkscope_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("--data-dir").arg(tempdir.path()).arg("mcp");
        }),
    )?;

    let client = ().serve(transport).await?;

    let status = client
        .peer()
        .call_tool(CallToolRequestParams::new("chunkscope_status"))
        .await?;
    let status = status.structured_content.expect("structured status");
    assert_eq!(status.get("documents").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(status.get("chunks").and_then(|v| v.as_u64()), Some(3));

    let args = json!({
        "query": "Hello world.",
        "topK": 1,
        "contextLength": 1,
        "includeTags": true
    });

    let result = client
        .peer()
        .call_tool(CallToolRequestParams::new("chunkscope_search").with_arguments(args.as_object().unwrap().clone()))
        .await?;

    let structured = result.structured_content.expect("structured content");
    let matches = structured
        .get("matches")
        .and_then(|v| v.as_array())
        .expect("matches array");

    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0].get("text").and_then(|v| v.as_str()),
        Some("Hello world.")
    );
    assert_eq!(
        matches[0].pointer("/tags/parent_text").and_then(|v| v.as_str()),
        Some("hello.md")
    );
    assert_eq!(
        matches[0].pointer("/tags/context").and_then(|v| v.as_str()),
        Some("Hello world. The second sentence talks about weather.")
    );

    let ranked_args = json!({
        "query": "Hello world.",
        "topK": 3,
        "rankBy": "max",
        "includeTags": false
    });
    let ranked = client
        .peer()
        .call_tool(CallToolRequestParams::new("chunkscope_search").with_arguments(ranked_args.as_object().unwrap().clone()))
        .await?;
    let ranked = ranked.structured_content.expect("structured content");
    assert_eq!(ranked.get("rank_by").and_then(|v| v.as_str()), Some("max"));
    let first = &ranked["matches"][0];
    assert!(first.get("tags").is_none());
    assert_eq!(first.get("text").and_then(|v| v.as_str()), Some("Hello world."));

    client.cancel().await?;
    Ok(())
}

fn chunkscope_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(bin) = option_env!("CARGO_BIN_EXE_chunkscope") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("chunkscope");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
