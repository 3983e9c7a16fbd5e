use kube::CustomResourceExt;
use k8zner_operator::crd::Cluster;

fn main() {
    print!("{}", serde_yaml::to_string(&Cluster::crd()).unwrap());
}
