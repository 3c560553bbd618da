use super::*;

mod fixtures {
    use super::*;

    pub const INVENTORY: &str = "/etc/ansible/hosts";

    // Builds options for INVENTORY from built-in defaults and a single set of overrides.
    pub fn build_with(overrides: Overrides) -> Result<RunOptions> {
        build(
            Some(INVENTORY),
            &EngineDefaults::default(),
            &Overrides::new(),
            &overrides,
        )
    }
}
use fixtures::*;

mod build {
    use super::*;

    #[test]
    fn fills_in_engine_defaults() {
        let options = build_with(Overrides::new()).unwrap();
        let defaults = EngineDefaults::default();

        assert_eq!(Some(INVENTORY.to_string()), options.inventory);
        assert_eq!(defaults.forks, options.forks);
        assert_eq!(defaults.timeout, options.timeout);
        assert_eq!(defaults.transport, options.connection);
        assert_eq!(defaults.become_user, options.become_user);
        assert_eq!(defaults.become_method, options.become_method);
        assert!(options.tags.is_empty());
        assert!(options.skip_tags.is_empty());
        assert!(options.extra_vars.is_empty());
        assert_eq!(None, options.subset);
        assert_eq!(0, options.verbosity);
    }

    #[test]
    fn call_overrides_beat_custom_options() {
        let custom = Overrides::new().with("forks", 10).with("timeout", 60);
        let call = Overrides::new().with("forks", 2);
        let options = build(None, &EngineDefaults::default(), &custom, &call).unwrap();

        assert_eq!(2, options.forks);
        assert_eq!(60, options.timeout);
    }

    #[test]
    fn accepts_numbers_as_strings() {
        let options = build_with(Overrides::new().with("forks", "7")).unwrap();
        assert_eq!(7, options.forks);
    }

    #[test]
    fn keeps_unknown_options() {
        let options = build_with(Overrides::new().with("start_at_task", "deploy")).unwrap();
        assert_eq!(
            Some(&Value::from("deploy")),
            options.other.get("start_at_task")
        );
    }

    #[test]
    fn credentials_are_not_options() {
        let options = build_with(Overrides::new().with("conn_pass", "hunter2")).unwrap();
        assert!(options.other.is_empty());
    }

    #[test]
    fn rejects_wrong_types() {
        match build_with(Overrides::new().with("forks", vec!["a"])) {
            Err(Error::InvalidParameter { name, param }) => {
                assert_eq!("sequence", name);
                assert_eq!("forks", param);
            }
            x => panic!("expected InvalidParameter, but received: {x:?}"),
        }
    }

    #[test]
    fn verbosity_must_fit() {
        assert!(matches!(
            build_with(Overrides::new().with("verbosity", 4096)),
            Err(Error::InvalidParameter { .. })
        ));
        assert_eq!(
            3,
            build_with(Overrides::new().with("verbosity", 3))
                .unwrap()
                .verbosity
        );
    }
}

mod tags {
    use super::*;

    #[test]
    fn list_is_unchanged() {
        let tags = vec!["web", "db", "web"];
        let options = build_with(Overrides::new().with("tags", tags.clone())).unwrap();
        assert_eq!(tags, options.tags);
    }

    #[test]
    fn string_is_split_on_commas() {
        let options = build_with(Overrides::new().with("tags", "setup,deploy,verify")).unwrap();
        assert_eq!(vec!["setup", "deploy", "verify"], options.tags);
    }

    #[test]
    fn string_without_commas_is_one_tag() {
        let options = build_with(Overrides::new().with("tags", "deploy")).unwrap();
        assert_eq!(vec!["deploy"], options.tags);
    }

    #[test]
    fn other_types_are_invalid() {
        for (value, expected) in [
            (Value::from(7), "number"),
            (Value::from(true), "bool"),
            (Value::Mapping(Default::default()), "mapping"),
            (Value::Null, "null"),
        ] {
            match build_with(Overrides::new().with("tags", value)) {
                Err(Error::InvalidParameter { name, param }) => {
                    assert_eq!(expected, name);
                    assert_eq!("tag", param);
                }
                x => panic!("expected InvalidParameter, but received: {x:?}"),
            }
        }
    }

    #[test]
    fn skip_tags_are_normalized_too() {
        let options = build_with(Overrides::new().with("skip_tags", "slow,flaky")).unwrap();
        assert_eq!(vec!["slow", "flaky"], options.skip_tags);
    }
}

mod extra_vars {
    use super::*;

    #[test]
    fn mapping() {
        let vars: serde_yaml::Mapping = serde_yaml::from_str("release: 1.4\nregion: eu").unwrap();
        let options =
            build_with(Overrides::new().with("extra_vars", Value::Mapping(vars))).unwrap();
        assert_eq!(Some(&Value::from("eu")), options.extra_vars.get("region"));
        assert_eq!(2, options.extra_vars.len());
    }

    #[test]
    fn key_value_string() {
        let options = build_with(Overrides::new().with("extra_vars", "a=1 b='two words'")).unwrap();
        assert_eq!(Some(&Value::from("1")), options.extra_vars.get("a"));
        assert_eq!(Some(&Value::from("two words")), options.extra_vars.get("b"));
    }

    #[test]
    fn file_references_are_kept() {
        let options =
            build_with(Overrides::new().with("extra_vars", vec!["@vars.yml", "x=y"])).unwrap();
        assert!(options.extra_vars.contains_key("@vars.yml"));
        assert_eq!(Some(&Value::from("y")), options.extra_vars.get("x"));
    }
}

mod passwords {
    use super::*;

    #[test]
    fn reads_both() {
        let overrides = Overrides::new()
            .with("conn_pass", "ssh-secret")
            .with("become_pass", "sudo-secret");
        let passwords = Passwords::from_overrides(&overrides).unwrap();
        assert_eq!(Some("ssh-secret"), passwords.conn_pass.as_deref());
        assert_eq!(Some("sudo-secret"), passwords.become_pass.as_deref());
    }

    #[test]
    fn debug_output_is_redacted() {
        let passwords = Passwords {
            conn_pass: Some("ssh-secret".into()),
            become_pass: None,
        };
        let debug = format!("{passwords:?}");
        assert!(!debug.contains("ssh-secret"));
        assert!(debug.contains("redacted"));
    }
}
