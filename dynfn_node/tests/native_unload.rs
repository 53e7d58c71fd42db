// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT

// Kept apart from the other native tests: it counts the libraries mapped
// into this process, so nothing else may load one at the same time.

#![cfg(target_os = "linux")]

use dynfn_api::error::DynFnError;

fn mapped_artifacts() -> usize {
    std::fs::read_to_string("/proc/self/maps")
        .unwrap()
        .lines()
        .filter(|l| l.contains("dynfn-native-"))
        .map(|l| l.rsplit(' ').next().unwrap_or_default().to_string())
        .collect::<std::collections::HashSet<String>>()
        .len()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_faulting_calls_unload_their_library() {
    let _ = env_logger::builder().is_test(true).try_init();
    // a backtrace capture inside the artifact would keep it mapped
    std::env::set_var("RUST_BACKTRACE", "1");

    let dir = tempfile::tempdir().unwrap();
    let settings = dynfn_node::DynFnSettings {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    let node = dynfn_node::DynFnNode::new(settings).await.unwrap();
    node.registry()
        .register(dynfn_node::registry::RegisterRequest {
            name: "fail".to_string(),
            description: "always panics".to_string(),
            parameters: r#"[{"name":"n","type":"int"}]"#.to_string(),
            body: "if n >= 0 { panic!(\"bad input {}\", n) }\nn".to_string(),
            kind: "code".to_string(),
            output_instructions: String::new(),
        })
        .await
        .unwrap();

    for i in 0..10 {
        match node.exec("fail", &format!("{{\"n\":{}}}", i)).await {
            Err(DynFnError::ExecutionFault(msg)) => assert_eq!(format!("bad input {}", i), msg),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(0, mapped_artifacts());

    assert_eq!("-1", node.exec("fail", r#"{"n":-1}"#).await.unwrap());
    assert_eq!(0, mapped_artifacts());
}
