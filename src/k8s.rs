pub mod k8s_common;
pub mod pod;
