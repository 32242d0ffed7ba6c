use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An OAuth client registered with the cluster's identity provider. The
/// provider's operator watches these and creates a secret of the same name
/// holding `clientId` and `clientSecret`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
	group = "homelab.dev",
	version = "v1alpha1",
	kind = "AuthClient",
	plural = "authclients",
	derive = "PartialEq",
	namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthClientSpec {
	/// The URIs the identity provider may redirect to after a login
	pub redirect_uris: Vec<String>,
	/// The URIs the identity provider may redirect to after a logout
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub post_logout_redirect_uris: Vec<String>,
}
