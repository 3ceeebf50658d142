use super::*;

#[test]
fn test_cli_parse_partitions() {
    let args: Cli = Cli::from_args(&["meshroute"], &["partitions", "-d", "props.json", "-s", "articles"]).unwrap();
    match args.command {
        Commands::Partitions(PartitionsArgs { dump, service }) => {
            assert_eq!(dump, PathBuf::from("props.json"));
            assert_eq!(service, "articles");
        }
        _ => panic!("Expected Partitions command"),
    }
}

#[test]
fn test_cli_parse_ring_default_partition() {
    let args: Cli = Cli::from_args(&["meshroute"], &["ring", "--dump", "props.json", "--service", "articles"]).unwrap();
    match args.command {
        Commands::Ring(RingArgs { partition, .. }) => assert_eq!(partition, 0),
        _ => panic!("Expected Ring command"),
    }
}

#[test]
fn test_cli_parse_map_keys() {
    let args: Cli = Cli::from_args(
        &["meshroute"],
        &[
            "map-keys", "-d", "props.json", "-s", "articles",
            "--hosts", "3", "--sticky", "session-1",
            "17", "42",
        ],
    )
    .unwrap();
    match args.command {
        Commands::MapKeys(MapKeysArgs { hosts, sticky, keys, .. }) => {
            assert_eq!(hosts, Some(3));
            assert_eq!(sticky.as_deref(), Some("session-1"));
            assert_eq!(keys, vec!["17".to_string(), "42".to_string()]);
        }
        _ => panic!("Expected MapKeys command"),
    }
}

#[test]
fn test_cli_parse_resolve() {
    let args: Cli = Cli::from_args(&["meshroute"], &["resolve", "-d", "props.json", "d2://articles/items?id=1"]).unwrap();
    match args.command {
        Commands::Resolve(ResolveArgs { request, .. }) => assert_eq!(request, "d2://articles/items?id=1"),
        _ => panic!("Expected Resolve command"),
    }
}

#[test]
fn test_cli_requires_service() {
    assert!(Cli::from_args(&["meshroute"], &["partitions", "-d", "props.json"]).is_err());
}
