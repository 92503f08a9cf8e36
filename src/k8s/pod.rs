//! PodSpec assembly for a standalone pgAdmin instance run under the supervisor.

use super::k8s_common::admin_identity;
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapProjection, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, KeyToPath, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    ProjectedVolumeSource, ResourceRequirements, SeccompProfile, SecretKeySelector,
    SecretProjection, SecurityContext, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const CONTAINER_PGADMIN: &str = "pgadmin";
pub const CONTAINER_PGADMIN_STARTUP: &str = "pgadmin-startup";
pub const PORT_PGADMIN: &str = "pgadmin";
pub const PGADMIN_PORT: i32 = 5050;

pub const SETTINGS_CONFIG_MAP_KEY: &str = "pgadmin-settings.json";
pub const SETTINGS_CLUSTER_MAP_KEY: &str = "pgadmin-shared-clusters.json";

pub const CONFIG_MOUNT_PATH: &str = "/etc/pgadmin/conf.d";
pub const CONFIG_FILE_PATH: &str = "~postgres-operator/pgadmin-settings.json";
pub const CLUSTER_FILE_PATH: &str = "~postgres-operator/pgadmin-shared-clusters.json";
pub const LDAP_FILE_PATH: &str = "~postgres-operator/ldap-bind-password";

// only the script written by the init container lives here
pub const SCRIPT_MOUNT_PATH: &str = "/etc/pgadmin";

pub const SUPERVISOR_BINARY: &str = "pgadmin-supervisor";

const CONFIG_VOLUME: &str = "pgadmin-config";
const DATA_VOLUME: &str = "pgadmin-data";
const LOG_VOLUME: &str = "pgadmin-log";
const SCRIPT_VOLUME: &str = "pgadmin-config-system";
const TMP_VOLUME: &str = "tmp";

/// The parts of a pgAdmin resource the pod depends on.
#[derive(Debug, Clone, Default)]
pub struct PgAdminInstance {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub image_pull_policy: Option<String>,
    pub resources: Option<ResourceRequirements>,
    /// Extra projections placed in the config volume ahead of the generated ones.
    pub config_files: Vec<VolumeProjection>,
    pub ldap_bind_password: Option<SecretKeySelector>,
}

impl PgAdminInstance {
    pub fn secret_name(&self) -> String {
        format!("pgadmin-{}", self.name)
    }
}

/// Absolute path of the file the supervisor watches.
pub fn cluster_file() -> String {
    format!("{}/{}", CONFIG_MOUNT_PATH, CLUSTER_FILE_PATH)
}

/// Builds the volumes, init container and supervised pgAdmin container.
pub fn pod(instance: &PgAdminInstance, config_map_name: &str, pvc_name: &str) -> PodSpec {
    let volumes = vec![
        Volume {
            name: CONFIG_VOLUME.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(pod_config_files(instance, config_map_name)),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
        memory_volume(LOG_VOLUME, None),
        // tmpfs blocks are page sized; an overfull volume gets the pod evicted
        memory_volume(SCRIPT_VOLUME, Some(Quantity("32Ki".to_string()))),
        memory_volume(TMP_VOLUME, None),
    ];

    let container = Container {
        name: CONTAINER_PGADMIN.to_string(),
        command: Some(supervisor_command()),
        image: Some(instance.image.clone()),
        image_pull_policy: instance.image_pull_policy.clone(),
        resources: instance.resources.clone(),
        security_context: Some(restricted_security_context()),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_PGADMIN.to_string()),
            container_port: PGADMIN_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "PGADMIN_SETUP_EMAIL".to_string(),
                value: Some(admin_identity(&instance.name, &instance.namespace)),
                ..Default::default()
            },
            EnvVar {
                name: "PGADMIN_SETUP_PASSWORD".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: instance.secret_name(),
                        key: "password".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "PGADMIN_LISTEN_PORT".to_string(),
                value: Some(PGADMIN_PORT.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, CONFIG_MOUNT_PATH, true),
            mount(DATA_VOLUME, "/var/lib/pgadmin", false),
            mount(LOG_VOLUME, "/var/log/pgadmin", false),
            mount(SCRIPT_VOLUME, SCRIPT_MOUNT_PATH, true),
            mount(TMP_VOLUME, "/tmp", false),
        ]),
        ..Default::default()
    };

    let startup = Container {
        name: CONTAINER_PGADMIN_STARTUP.to_string(),
        command: Some(startup_command()),
        image: container.image.clone(),
        image_pull_policy: container.image_pull_policy.clone(),
        resources: container.resources.clone(),
        security_context: Some(restricted_security_context()),
        volume_mounts: Some(vec![mount(SCRIPT_VOLUME, SCRIPT_MOUNT_PATH, false)]),
        ..Default::default()
    };

    PodSpec {
        volumes: Some(volumes),
        containers: vec![container],
        init_containers: Some(vec![startup]),
        ..Default::default()
    }
}

/// Projections for the config volume: user files, then the settings and
/// shared-clusters keys, then the LDAP bind password when one is referenced.
pub fn pod_config_files(instance: &PgAdminInstance, config_map_name: &str) -> Vec<VolumeProjection> {
    let mut config = instance.config_files.clone();
    config.push(VolumeProjection {
        config_map: Some(ConfigMapProjection {
            name: config_map_name.to_string(),
            items: Some(vec![
                KeyToPath {
                    key: SETTINGS_CONFIG_MAP_KEY.to_string(),
                    path: CONFIG_FILE_PATH.to_string(),
                    ..Default::default()
                },
                KeyToPath {
                    key: SETTINGS_CLUSTER_MAP_KEY.to_string(),
                    path: CLUSTER_FILE_PATH.to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    });

    // the bind password is kept out of the plaintext settings ConfigMap
    if let Some(ldap) = &instance.ldap_bind_password {
        config.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: ldap.name.clone(),
                optional: ldap.optional,
                items: Some(vec![KeyToPath {
                    key: ldap.key.clone(),
                    path: LDAP_FILE_PATH.to_string(),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
    }

    config
}

/// The main container's entrypoint: the supervisor watching the cluster file.
pub fn supervisor_command() -> Vec<String> {
    vec![SUPERVISOR_BINARY.to_string(), cluster_file()]
}

/// Init container entrypoint writing a read-only `config_system.py` that
/// pgAdmin loads after its other config files. It copies uppercase keys of the
/// settings JSON into globals and sets LDAP_BIND_PASSWORD from the secret
/// file last, so the secret wins over the ConfigMap.
pub fn startup_command() -> Vec<String> {
    let ldap_password_path = format!("{}/{}", CONFIG_MOUNT_PATH, LDAP_FILE_PATH);
    let config_system = format!(
        r#"import glob, json, re, os
DEFAULT_BINARY_PATHS = {{'pg': sorted([''] + glob.glob('/usr/pgsql-*/bin')).pop()}}
with open('{config_mount}/{config_file}') as _f:
    _conf, _data = re.compile(r'[A-Z_0-9]+'), json.load(_f)
    if type(_data) is dict:
        globals().update({{k: v for k, v in _data.items() if _conf.fullmatch(k)}})
if os.path.isfile('{ldap}'):
    with open('{ldap}') as _f:
        LDAP_BIND_PASSWORD = _f.read()
"#,
        config_mount = CONFIG_MOUNT_PATH,
        config_file = CONFIG_FILE_PATH,
        ldap = ldap_password_path,
    );

    let script = [
        format!("mkdir -p {}", CONFIG_MOUNT_PATH),
        format!("(umask a-w && echo \"$1\" > {}/config_system.py)", SCRIPT_MOUNT_PATH),
    ]
    .join("\n");

    vec![
        "bash".to_string(),
        "-ceu".to_string(),
        "--".to_string(),
        script,
        "startup".to_string(),
        config_system,
    ]
}

/// Non-root, no privilege escalation, all capabilities dropped, read-only
/// root filesystem and the runtime's default seccomp profile.
pub fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// OpenShift assigns the filesystem group itself; elsewhere use group 2 so
/// pgAdmin can write to its volumes whatever UID it runs as.
pub fn pod_security_context(is_openshift: bool) -> PodSecurityContext {
    PodSecurityContext {
        fs_group_change_policy: Some("OnRootMismatch".to_string()),
        fs_group: (!is_openshift).then_some(2),
        ..Default::default()
    }
}

fn memory_volume(name: &str, size_limit: Option<Quantity>) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            size_limit,
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hippo() -> PgAdminInstance {
        PgAdminInstance {
            name: "hippo".to_string(),
            namespace: "demo".to_string(),
            image: "registry.example.com/pgadmin4:8".to_string(),
            ..Default::default()
        }
    }

    fn volume_names(spec: &PodSpec) -> Vec<&str> {
        spec.volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.name.as_str())
            .collect()
    }

    #[test]
    fn pod_runs_supervisor_on_cluster_file() {
        let spec = pod(&hippo(), "pgadmin-hippo", "pgadmin-hippo-data");

        assert_eq!(
            volume_names(&spec),
            vec![CONFIG_VOLUME, DATA_VOLUME, LOG_VOLUME, SCRIPT_VOLUME, TMP_VOLUME]
        );

        let container = &spec.containers[0];
        assert_eq!(container.name, CONTAINER_PGADMIN);
        assert_eq!(
            container.command.as_ref().unwrap(),
            &vec![
                "pgadmin-supervisor".to_string(),
                "/etc/pgadmin/conf.d/~postgres-operator/pgadmin-shared-clusters.json".to_string()
            ]
        );

        let email = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "PGADMIN_SETUP_EMAIL")
            .unwrap();
        assert_eq!(email.value.as_deref(), Some("admin@hippo.demo.svc"));

        let password = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "PGADMIN_SETUP_PASSWORD")
            .unwrap();
        let secret = password
            .value_from
            .as_ref()
            .and_then(|source| source.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret.name, "pgadmin-hippo");
        assert_eq!(secret.key, "password");

        let init = &spec.init_containers.as_ref().unwrap()[0];
        assert_eq!(init.name, CONTAINER_PGADMIN_STARTUP);
        assert_eq!(init.image, container.image);
        let init_mount = &init.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(init_mount.mount_path, SCRIPT_MOUNT_PATH);
        assert_eq!(init_mount.read_only, None);
    }

    #[test]
    fn script_volume_is_size_limited() {
        let spec = pod(&hippo(), "cm", "pvc");
        let script = spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == SCRIPT_VOLUME)
            .unwrap();
        let empty_dir = script.empty_dir.as_ref().unwrap();
        assert_eq!(empty_dir.medium.as_deref(), Some("Memory"));
        assert_eq!(empty_dir.size_limit, Some(Quantity("32Ki".to_string())));
    }

    #[test]
    fn config_files_without_ldap() {
        let mut instance = hippo();
        instance.config_files = vec![VolumeProjection {
            secret: Some(SecretProjection {
                name: "extra".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }];

        let files = pod_config_files(&instance, "pgadmin-hippo");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].secret.as_ref().unwrap().name, "extra");

        let generated = files[1].config_map.as_ref().unwrap();
        assert_eq!(generated.name, "pgadmin-hippo");
        let paths: Vec<&str> = generated
            .items
            .as_ref()
            .unwrap()
            .iter()
            .map(|item| item.path.as_str())
            .collect();
        assert_eq!(paths, vec![CONFIG_FILE_PATH, CLUSTER_FILE_PATH]);
    }

    #[test]
    fn ldap_password_is_projected_last() {
        let mut instance = hippo();
        instance.ldap_bind_password = Some(SecretKeySelector {
            name: "ldap".to_string(),
            key: "bind-password".to_string(),
            optional: Some(true),
        });

        let files = pod_config_files(&instance, "pgadmin-hippo");
        let ldap = files.last().and_then(|p| p.secret.as_ref()).unwrap();
        assert_eq!(ldap.name, "ldap");
        assert_eq!(ldap.optional, Some(true));
        let item = &ldap.items.as_ref().unwrap()[0];
        assert_eq!(item.key, "bind-password");
        assert_eq!(item.path, LDAP_FILE_PATH);
    }

    #[test]
    fn startup_writes_config_system() {
        let command = startup_command();
        assert_eq!(&command[..3], &["bash", "-ceu", "--"]);
        assert!(command[3].contains("/etc/pgadmin/config_system.py"));
        assert!(command[5].contains("/etc/pgadmin/conf.d/~postgres-operator/pgadmin-settings.json"));
        assert!(command[5].contains("LDAP_BIND_PASSWORD"));
        assert!(command[5].starts_with("import glob"));
    }

    #[test]
    fn fs_group_is_left_to_openshift() {
        assert_eq!(pod_security_context(false).fs_group, Some(2));
        assert_eq!(pod_security_context(true).fs_group, None);
    }
}
